//! R2eff / R1rho files: `spin_id  point  value  error`.
//!
//! These carry effective relaxation rates that were computed elsewhere (or
//! written by `relax simulate`), one dispersion point per line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::warn;

use crate::error::{RelaxError, Result};
use crate::io::columns::{RowError, read_rows};

/// One effective rate measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct R2effPoint {
    pub spin_id: String,
    /// CPMG frequency or spin-lock field strength, in Hz.
    pub point_hz: f64,
    pub value: f64,
    pub error: f64,
}

/// Read an R2eff file. Rows that cannot be parsed are skipped with a warning.
pub fn read_r2eff(path: &Path, sep: Option<char>) -> Result<Vec<R2effPoint>> {
    let rows = read_rows(path, sep)?;
    let mut points = Vec::with_capacity(rows.len());
    let mut row_errors = Vec::new();

    for row in &rows {
        let parsed = (|| -> std::result::Result<R2effPoint, String> {
            let spin_id = row.get(0).ok_or("missing spin ID column")?.to_string();
            Ok(R2effPoint {
                spin_id,
                point_hz: row.parse(1, "dispersion point")?,
                value: row.parse(2, "relaxation rate")?,
                error: row.parse(3, "error")?,
            })
        })();
        match parsed {
            Ok(p) if p.error > 0.0 => points.push(p),
            Ok(p) => row_errors.push(RowError {
                line: row.line,
                message: format!("non-positive error {} for {}", p.error, p.spin_id),
            }),
            Err(message) => row_errors.push(RowError {
                line: row.line,
                message,
            }),
        }
    }

    for e in &row_errors {
        warn!(file = %path.display(), line = e.line, "{}", e.message);
    }
    if points.is_empty() {
        return Err(RelaxError::MissingData(format!(
            "no relaxation rates could be read from '{}'",
            path.display()
        )));
    }
    Ok(points)
}

/// Write an R2eff file with a commented header.
pub fn write_r2eff(path: &Path, points: &[R2effPoint], header: &str) -> Result<()> {
    let file = File::create(path).map_err(|e| RelaxError::io(path, e))?;
    let mut out = BufWriter::new(file);
    let write = |out: &mut BufWriter<File>| -> std::io::Result<()> {
        for line in header.lines() {
            writeln!(out, "# {line}")?;
        }
        writeln!(out, "# {:<18} {:>14} {:>16} {:>16}", "spin_id", "point", "value", "error")?;
        for p in points {
            writeln!(
                out,
                "{:<20} {:>14.6} {:>16.8} {:>16.8}",
                p.spin_id, p.point_hz, p.value, p.error
            )?;
        }
        out.flush()
    };
    write(&mut out).map_err(|e| RelaxError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_with_comments_and_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r2eff.txt");
        std::fs::write(
            &path,
            "# spin point value error\n:1@N 100 12.5 0.2\n:1@N 200 x 0.2\n:2@N 100 9.0 0.0\n:2@N 400 8.1 0.3\n",
        )
        .unwrap();

        let points = read_r2eff(&path, None).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].spin_id, ":1@N");
        assert_eq!(points[1].point_hz, 400.0);
    }

    #[test]
    fn written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.txt");
        let points = vec![
            R2effPoint {
                spin_id: ":5@N".into(),
                point_hz: 50.0,
                value: 15.25,
                error: 0.5,
            },
            R2effPoint {
                spin_id: ":5@N".into(),
                point_hz: 1000.0,
                value: 10.125,
                error: 0.5,
            },
        ];
        write_r2eff(&path, &points, "model CR72\nfield 600 MHz").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# model CR72\n# field 600 MHz\n"));
        assert_eq!(read_r2eff(&path, None).unwrap(), points);
    }

    #[test]
    fn empty_file_is_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "# nothing\n").unwrap();
        assert!(matches!(read_r2eff(&path, None), Err(RelaxError::MissingData(_))));
    }
}
