//! Export fitted parameters to CSV.
//!
//! One row per spin and parameter, meant for spreadsheets and downstream
//! scripts. Parameters shared by a cluster are repeated for each of its spins.

use std::path::Path;

use crate::domain::{ModelFitRecord, ParamValue, ResultsFile};
use crate::error::{RelaxError, Result};

/// Write every fit of a results file to CSV.
pub fn write_params_csv(path: &Path, results: &ResultsFile) -> Result<()> {
    let csv_err = |e: csv::Error| match e.into_kind() {
        csv::ErrorKind::Io(io) => RelaxError::io(path, io),
        other => RelaxError::Argument(format!("failed to write CSV '{}': {other:?}", path.display())),
    };

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer
        .write_record(["spin_id", "model", "param", "value", "error", "chi2"])
        .map_err(csv_err)?;

    for fit in &results.fits {
        for row in param_rows(fit) {
            writer.write_record(&row).map_err(csv_err)?;
        }
    }
    writer.flush().map_err(|e| RelaxError::io(path, e))
}

/// Parameter label, qualified by field for per-field rates.
fn param_label(p: &ParamValue) -> String {
    match p.field_mhz {
        Some(frq) => format!("{} ({frq} MHz)", p.name),
        None => p.name.to_string(),
    }
}

fn param_rows(fit: &ModelFitRecord) -> Vec<[String; 6]> {
    let mut rows = Vec::new();
    for spin in &fit.spins {
        for p in &fit.params {
            if p.spin_id.as_ref().is_some_and(|id| id != spin) {
                continue;
            }
            rows.push([
                spin.clone(),
                fit.model.clone(),
                param_label(p),
                format!("{:.10}", p.value),
                p.error.map(|e| format!("{e:.10}")).unwrap_or_default(),
                format!("{:.6}", fit.stats.chi2),
            ]);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnalysisKind, FitStats, ParamName};

    fn value(name: ParamName, spin: Option<&str>, value: f64) -> ParamValue {
        ParamValue {
            name,
            spin_id: spin.map(str::to_string),
            field_mhz: None,
            value,
            error: Some(0.1),
        }
    }

    #[test]
    fn cluster_globals_repeat_per_spin() {
        let mut r2 = value(ParamName::R2, Some(":1@N"), 10.0);
        r2.field_mhz = Some(600.0);
        let fit = ModelFitRecord {
            unit: "c1".into(),
            spins: vec![":1@N".into(), ":2@N".into()],
            model: "LM63".into(),
            params: vec![
                r2,
                value(ParamName::R2, Some(":2@N"), 11.0),
                value(ParamName::PhiEx, Some(":1@N"), 0.5),
                value(ParamName::PhiEx, Some(":2@N"), 0.7),
                value(ParamName::Kex, None, 1500.0),
            ],
            stats: FitStats {
                chi2: 2.0,
                ..FitStats::default()
            },
            criterion: None,
            selected: true,
            curves: Vec::new(),
        };

        let rows = param_rows(&fit);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0][2], "r2 (600 MHz)");
        assert_eq!(rows[2][0], ":1@N");
        assert_eq!(rows[2][2], "kex");
        assert_eq!(rows[5][0], ":2@N");
        assert_eq!(rows[5][2], "kex");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.csv");
        let results = ResultsFile {
            tool: "relax".into(),
            created: chrono::Local::now(),
            analysis: AnalysisKind::Dispersion,
            x_label: String::new(),
            y_label: String::new(),
            selection_method: None,
            monte_carlo_sims: 0,
            fits: vec![fit],
        };
        write_params_csv(&path, &results).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("spin_id,model,param,value,error,chi2"));
        assert_eq!(lines.count(), 6);
    }
}
