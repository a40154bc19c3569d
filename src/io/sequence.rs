//! Sequence and deselection files.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RelaxError, Result};
use crate::io::columns::{Row, read_rows};
use crate::mol::SpinSystem;

/// Zero-based column numbers of a sequence file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceColumns {
    pub mol_name_col: Option<usize>,
    pub res_num_col: Option<usize>,
    pub res_name_col: Option<usize>,
    pub spin_num_col: Option<usize>,
    pub spin_name_col: Option<usize>,
    pub sep: Option<char>,
}

impl Default for SequenceColumns {
    fn default() -> Self {
        Self {
            mol_name_col: None,
            res_num_col: Some(0),
            res_name_col: Some(1),
            spin_num_col: None,
            spin_name_col: None,
            sep: None,
        }
    }
}

/// Create one spin per data row of a sequence file.
///
/// Lines whose residue number column does not hold an integer are treated as
/// headers and skipped. Returns the number of spins created.
pub fn read_sequence(system: &mut SpinSystem, path: &Path, cols: &SequenceColumns) -> Result<usize> {
    if cols.res_num_col.is_none() && cols.res_name_col.is_none() && cols.spin_name_col.is_none() {
        return Err(RelaxError::Argument(
            "a sequence file needs at least a residue or spin column".to_string(),
        ));
    }

    let rows = read_rows(path, cols.sep)?;
    let text = |row: &Row, col: Option<usize>| -> Option<String> {
        col.and_then(|c| row.get(c)).map(str::to_string)
    };

    let mut created = 0;
    for row in &rows {
        let res_num = match cols.res_num_col {
            Some(c) => match row.get(c).map(str::parse::<i64>) {
                Some(Ok(n)) => Some(n),
                _ => {
                    debug!(line = row.line, "skipping sequence header line");
                    continue;
                }
            },
            None => None,
        };
        let spin_num = match cols.spin_num_col {
            Some(c) => Some(row.parse::<i64>(c, "spin number").map_err(|message| RelaxError::Parse {
                path: path.to_path_buf(),
                line: row.line,
                message,
            })?),
            None => None,
        };

        system.create_spin(
            text(row, cols.mol_name_col).as_deref(),
            res_num,
            text(row, cols.res_name_col).as_deref(),
            spin_num,
            text(row, cols.spin_name_col).as_deref(),
        )?;
        created += 1;
    }

    if created == 0 {
        return Err(RelaxError::MissingData(format!(
            "no sequence data could be read from '{}'",
            path.display()
        )));
    }
    info!(file = %path.display(), spins = created, "Read sequence");
    Ok(created)
}

/// Deselect the spins listed in column `col` of a file.
///
/// The column may hold residue numbers or full spin identification strings.
/// Returns the number of spins deselected.
pub fn read_deselection(system: &mut SpinSystem, path: &Path, col: usize, sep: Option<char>) -> Result<usize> {
    let rows = read_rows(path, sep)?;
    let mut count = 0;
    for row in &rows {
        let Some(entry) = row.get(col) else {
            continue;
        };
        let id = if entry.parse::<i64>().is_ok() {
            format!(":{entry}")
        } else if entry.contains([':', '@', '#']) {
            entry.to_string()
        } else {
            debug!(line = row.line, "skipping deselection header line");
            continue;
        };
        count += system.deselect(Some(&id), false)?;
    }
    info!(file = %path.display(), spins = count, "Deselected spins");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn sequence_with_header_and_comments() {
        let file = write("Num Name\n# comment\n1 GLY\n2 ALA\n\n3 LEU\n");
        let mut sys = SpinSystem::new();
        let n = read_sequence(&mut sys, file.path(), &SequenceColumns::default()).unwrap();
        assert_eq!(n, 3);
        assert_eq!(sys.count_spins(None, false).unwrap(), 3);
        let view = sys.return_spin(":2").unwrap().unwrap();
        assert_eq!(view.res_name, Some("ALA"));
    }

    #[test]
    fn sequence_with_spin_names() {
        let file = write("1,GLY,N\n1,GLY,CA\n2,ALA,N\n");
        let cols = SequenceColumns {
            spin_name_col: Some(2),
            sep: Some(','),
            ..SequenceColumns::default()
        };
        let mut sys = SpinSystem::new();
        read_sequence(&mut sys, file.path(), &cols).unwrap();
        assert_eq!(sys.count_spins(Some("@N"), false).unwrap(), 2);
        assert_eq!(sys.molecules[0].residues.len(), 2);
    }

    #[test]
    fn empty_sequence_is_an_error() {
        let file = write("# nothing\n");
        let mut sys = SpinSystem::new();
        assert!(read_sequence(&mut sys, file.path(), &SequenceColumns::default()).is_err());
    }

    #[test]
    fn deselection_by_number_and_id() {
        let seq = write("1 GLY\n2 ALA\n3 LEU\n4 SER\n");
        let mut sys = SpinSystem::new();
        read_sequence(&mut sys, seq.path(), &SequenceColumns::default()).unwrap();

        let desel = write("residue\n2\n:4\n");
        let n = read_deselection(&mut sys, desel.path(), 0, None).unwrap();
        assert_eq!(n, 2);
        assert_eq!(sys.count_spins(None, true).unwrap(), 2);
        assert!(!sys.return_spin(":4").unwrap().unwrap().spin.select);
    }
}
