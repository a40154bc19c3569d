//! Peak intensity lists.
//!
//! Two formats are understood:
//!
//! - Sparky, with an `Assignment` header and rows such as
//!   `G2N-HN  122.454  8.397  1425678`
//! - generic whitespace or character separated columns holding the residue
//!   number, spin name and intensity

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RelaxError, Result};
use crate::io::columns::{Row, RowError, read_rows, split_whitespace_rows};

/// Column layout of a generic peak list (zero-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericColumns {
    pub res_num_col: usize,
    pub spin_name_col: usize,
    pub int_col: usize,
    #[serde(default)]
    pub sep: Option<char>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PeakFormat {
    #[default]
    Sparky,
    Generic(GenericColumns),
}

/// One assigned peak.
#[derive(Debug, Clone, PartialEq)]
pub struct Peak {
    pub res_num: i64,
    pub res_name: Option<String>,
    /// Heteronucleus name, for example `N`.
    pub spin_name: String,
    /// Heteronucleus chemical shift in ppm, when the list has one.
    pub shift: Option<f64>,
    pub intensity: f64,
    pub line: usize,
}

impl Peak {
    /// Spin identification string used to find the spin in the sequence.
    pub fn spin_id(&self) -> String {
        format!(":{}@{}", self.res_num, self.spin_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakList {
    pub peaks: Vec<Peak>,
    pub row_errors: Vec<RowError>,
}

pub fn read_peak_list(path: &Path, format: &PeakFormat) -> Result<PeakList> {
    let rows = match format {
        PeakFormat::Sparky => {
            let text = std::fs::read_to_string(path).map_err(|e| RelaxError::io(path, e))?;
            split_whitespace_rows(&text)
        }
        PeakFormat::Generic(cols) => read_rows(path, cols.sep)?,
    };
    let list = parse_rows(&rows, format, &sparky_pattern()?);
    for e in &list.row_errors {
        warn!(file = %path.display(), line = e.line, "{}", e.message);
    }
    if list.peaks.is_empty() {
        return Err(RelaxError::MissingData(format!(
            "no peak intensities could be read from '{}'",
            path.display()
        )));
    }
    Ok(list)
}

/// Heavy atom of a Sparky assignment: residue name, number and atom name,
/// e.g. `G2N` of `G2N-HN` or `Gly-3N` of a negatively numbered residue.
fn sparky_pattern() -> Result<Regex> {
    Regex::new(r"^([A-Za-z]*)(-?\d+)([A-Za-z][A-Za-z0-9'*#]*)(?:-|$)")
        .map_err(|e| RelaxError::Argument(format!("invalid Sparky assignment pattern: {e}")))
}

fn parse_rows(rows: &[Row], format: &PeakFormat, sparky: &Regex) -> PeakList {
    let mut list = PeakList::default();
    for row in rows {
        let parsed = match format {
            PeakFormat::Sparky => {
                if row.fields.iter().any(|f| f == "Assignment") {
                    continue;
                }
                parse_sparky_row(row, sparky)
            }
            PeakFormat::Generic(cols) => parse_generic_row(row, cols),
        };
        match parsed {
            Ok(Some(peak)) => list.peaks.push(peak),
            Ok(None) => list.row_errors.push(RowError {
                line: row.line,
                message: "unassigned peak skipped".to_string(),
            }),
            Err(message) => list.row_errors.push(RowError {
                line: row.line,
                message,
            }),
        }
    }
    list
}

fn parse_sparky_row(row: &Row, sparky: &Regex) -> std::result::Result<Option<Peak>, String> {
    let assignment = row.get(0).ok_or("empty row")?;
    if assignment.starts_with('?') {
        return Ok(None);
    }
    if row.fields.len() < 2 {
        return Err(format!("no intensity for assignment '{assignment}'"));
    }

    let (res_name, res_num, spin_name) = split_sparky_atom(sparky, assignment)
        .ok_or_else(|| format!("cannot parse the assignment '{assignment}'"))?;

    let int_col = row.fields.len() - 1;
    let intensity = row.parse::<f64>(int_col, "intensity")?;
    let shift = if row.fields.len() >= 4 {
        row.parse::<f64>(1, "chemical shift").ok()
    } else {
        None
    };

    Ok(Some(Peak {
        res_num,
        res_name,
        spin_name,
        shift,
        intensity,
        line: row.line,
    }))
}

/// `G2N-HN` into residue name `G`, number 2 and atom `N`.
fn split_sparky_atom(sparky: &Regex, assignment: &str) -> Option<(Option<String>, i64, String)> {
    let caps = sparky.captures(assignment)?;
    let res_name = &caps[1];
    Some((
        (!res_name.is_empty()).then(|| res_name.to_string()),
        caps[2].parse().ok()?,
        caps[3].to_string(),
    ))
}

fn parse_generic_row(row: &Row, cols: &GenericColumns) -> std::result::Result<Option<Peak>, String> {
    let res_num = match row.parse::<i64>(cols.res_num_col, "residue number") {
        Ok(n) => n,
        Err(_) if row.line == 1 => return Err("header line skipped".to_string()),
        Err(e) => return Err(e),
    };
    let spin_name = row
        .get(cols.spin_name_col)
        .ok_or_else(|| format!("missing spin name column {}", cols.spin_name_col))?;
    let intensity = row.parse::<f64>(cols.int_col, "intensity")?;
    Ok(Some(Peak {
        res_num,
        res_name: None,
        spin_name: spin_name.to_string(),
        shift: None,
        intensity,
        line: row.line,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPARKY: &str = "\
      Assignment         w1         w2   Data Height

        G2N-HN    122.454      8.397      1425678
        L3N-HN    121.123      7.812       987654
         ?-?      118.000      8.000        12345
       T4N-HN    junk      7.100      notanumber
";

    #[test]
    fn sparky_rows() {
        let sparky = sparky_pattern().unwrap();
        let list = parse_rows(&split_whitespace_rows(SPARKY), &PeakFormat::Sparky, &sparky);
        assert_eq!(list.peaks.len(), 2);
        assert_eq!(list.row_errors.len(), 2);

        let p = &list.peaks[0];
        assert_eq!(p.res_num, 2);
        assert_eq!(p.res_name.as_deref(), Some("G"));
        assert_eq!(p.spin_name, "N");
        assert_eq!(p.shift, Some(122.454));
        assert_eq!(p.intensity, 1425678.0);
        assert_eq!(p.spin_id(), ":2@N");
    }

    #[test]
    fn sparky_atom_names() {
        let sparky = sparky_pattern().unwrap();
        let split = |text| split_sparky_atom(&sparky, text);
        assert_eq!(split("Gly12N"), Some((Some("Gly".to_string()), 12, "N".to_string())));
        assert_eq!(split("12N-HN"), Some((None, 12, "N".to_string())));
        assert_eq!(split("G-3N-HN"), Some((Some("G".to_string()), -3, "N".to_string())));
        assert_eq!(split("A5C1'-H1'"), Some((Some("A".to_string()), 5, "C1'".to_string())));
        assert_eq!(split("GN"), None);
        assert_eq!(split("G12"), None);
        assert_eq!(split("G12-HN"), None);
    }

    #[test]
    fn generic_columns_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "resnum name intensity").unwrap();
        writeln!(file, "5 N 1000.5").unwrap();
        writeln!(file, "6 N 900").unwrap();
        let format = PeakFormat::Generic(GenericColumns {
            res_num_col: 0,
            spin_name_col: 1,
            int_col: 2,
            sep: None,
        });
        let list = read_peak_list(file.path(), &format).unwrap();
        assert_eq!(list.peaks.len(), 2);
        assert_eq!(list.peaks[1].intensity, 900.0);
        assert_eq!(list.row_errors.len(), 1);
    }

    #[test]
    fn empty_list_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Assignment w1 w2 Data Height").unwrap();
        assert!(read_peak_list(file.path(), &PeakFormat::Sparky).is_err());
    }
}
