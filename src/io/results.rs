//! Read/write results JSON files.
//!
//! A results file is the portable record of an analysis: every model fitted
//! to every spin or cluster, the selection outcome, and the curves needed to
//! redraw the fits. The schema is `domain::ResultsFile`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::ResultsFile;
use crate::error::{RelaxError, Result};

/// Write a results JSON file.
pub fn write_results_json(path: &Path, results: &ResultsFile) -> Result<()> {
    let file = File::create(path).map_err(|e| RelaxError::io(path, e))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, results).map_err(|source| RelaxError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    out.flush().map_err(|e| RelaxError::io(path, e))
}

/// Read a results JSON file.
pub fn read_results_json(path: &Path) -> Result<ResultsFile> {
    let file = File::open(path).map_err(|e| RelaxError::io(path, e))?;
    let results: ResultsFile =
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| RelaxError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    if results.fits.is_empty() {
        return Err(RelaxError::MissingData(format!(
            "the results file '{}' holds no fits",
            path.display()
        )));
    }
    Ok(results)
}
