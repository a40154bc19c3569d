//! Column-oriented text files.
//!
//! NMR tools write whitespace-aligned tables. When an explicit separator is
//! given the file is read with the `csv` crate instead.

use std::fs::File;
use std::path::Path;

use crate::error::{RelaxError, Result};

/// One non-blank, non-comment line split into fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based line number.
    pub line: usize,
    pub fields: Vec<String>,
}

impl Row {
    pub fn get(&self, col: usize) -> Option<&str> {
        self.fields.get(col).map(String::as_str)
    }

    /// Parse column `col`, with a row-level error message on failure.
    pub fn parse<T: std::str::FromStr>(&self, col: usize, what: &str) -> std::result::Result<T, String> {
        let raw = self
            .get(col)
            .ok_or_else(|| format!("missing {what} column {col}"))?;
        raw.parse()
            .map_err(|_| format!("invalid {what} '{raw}' in column {col}"))
    }
}

/// A row-level problem that was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Read every data row of a file.
///
/// Blank lines and lines starting with `#` are skipped.
pub fn read_rows(path: &Path, sep: Option<char>) -> Result<Vec<Row>> {
    match sep {
        Some(sep) => read_delimited(path, sep),
        None => {
            let text = std::fs::read_to_string(path).map_err(|e| RelaxError::io(path, e))?;
            Ok(split_whitespace_rows(&text))
        }
    }
}

pub fn split_whitespace_rows(text: &str) -> Vec<Row> {
    text.lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let line = line.trim_start_matches('\u{feff}').trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            Some(Row {
                line: i + 1,
                fields: line.split_whitespace().map(str::to_string).collect(),
            })
        })
        .collect()
}

fn read_delimited(path: &Path, sep: char) -> Result<Vec<Row>> {
    let delimiter = u8::try_from(sep).map_err(|_| {
        RelaxError::Argument(format!("the column separator '{sep}' must be a single-byte character"))
    })?;
    let file = File::open(path).map_err(|e| RelaxError::io(path, e))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .delimiter(delimiter)
        .from_reader(file);

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| RelaxError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            message: e.to_string(),
        })?;
        let line = record.position().map_or(idx + 1, |p| p.line() as usize);
        let fields: Vec<String> = record
            .iter()
            .map(|f| f.trim_start_matches('\u{feff}').to_string())
            .collect();
        if fields.iter().all(String::is_empty) {
            continue;
        }
        rows.push(Row { line, fields });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn whitespace_rows_skip_comments_and_blanks() {
        let rows = split_whitespace_rows("# header\n\n  1  GLY   N \n2\tALA\tN\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 3);
        assert_eq!(rows[0].fields, vec!["1", "GLY", "N"]);
        assert_eq!(rows[1].parse::<i64>(0, "residue number"), Ok(2));
        assert!(rows[1].parse::<i64>(1, "residue number").is_err());
        assert!(rows[1].parse::<i64>(5, "residue number").is_err());
    }

    #[test]
    fn delimited_rows_use_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "1, GLY, N").unwrap();
        writeln!(file, "2,ALA,N").unwrap();
        let rows = read_rows(file.path(), Some(',')).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fields, vec!["1", "GLY", "N"]);
        assert_eq!(rows[1].get(1), Some("ALA"));
    }
}
