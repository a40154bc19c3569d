//! Model selection with AIC, AICc or BIC.
//!
//! For every fit unit the candidate with the lowest criterion wins. Ties go
//! to the candidate fitted first, so the order of the model list matters:
//! simpler models should come first.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::domain::{ModelFitRecord, SelectionMethod};

/// Value of an information criterion.
///
/// AICc is infinite when `n - k - 1 <= 0`.
pub fn criterion(method: SelectionMethod, chi2: f64, k: usize, n: usize) -> f64 {
    let kf = k as f64;
    match method {
        SelectionMethod::Aic => chi2 + 2.0 * kf,
        SelectionMethod::Aicc => {
            if n <= k + 1 {
                f64::INFINITY
            } else {
                chi2 + 2.0 * kf + 2.0 * kf * (kf + 1.0) / (n as f64 - kf - 1.0)
            }
        }
        SelectionMethod::Bic => chi2 + kf * (n as f64).ln(),
    }
}

/// Score every fit and flag the winner of each unit.
///
/// Returns the number of units.
pub fn select_model(fits: &mut [ModelFitRecord], method: SelectionMethod) -> usize {
    let mut best: HashMap<String, (usize, f64)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for (i, fit) in fits.iter_mut().enumerate() {
        let value = criterion(method, fit.stats.chi2, fit.stats.k, fit.stats.n);
        fit.criterion = Some(value);
        fit.selected = false;
        debug!(unit = %fit.unit, model = %fit.model, value, "{}", method.display_name());

        match best.get_mut(&fit.unit) {
            Some(entry) => {
                // Strict comparison: ties keep the earlier candidate.
                if value < entry.1 {
                    *entry = (i, value);
                }
            }
            None => {
                order.push(fit.unit.clone());
                best.insert(fit.unit.clone(), (i, value));
            }
        }
    }

    for unit in &order {
        if let Some(&(i, _)) = best.get(unit) {
            fits[i].selected = true;
            info!(unit = %unit, model = %fits[i].model, "Selected model");
        }
    }
    order.len()
}
