//! Monte Carlo error analysis.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::{McMethod, ModelFitRecord};
use crate::error::{RelaxError, Result};
use crate::fit::{FitOptions, FitOutcome, FitUnit, UnitFit};

/// Monte Carlo simulation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarlo {
    pub number: usize,
    pub seed: u64,
    pub method: McMethod,
    /// Fraction of simulations pruned from the chi-squared tails, in `[0, 1)`.
    pub prune: f64,
}

impl MonteCarlo {
    pub fn setup(number: usize, seed: u64) -> Result<Self> {
        if number < 2 {
            return Err(RelaxError::Argument(
                "at least two Monte Carlo simulations are needed".to_string(),
            ));
        }
        Ok(Self {
            number,
            seed,
            method: McMethod::BackCalc,
            prune: 0.0,
        })
    }

    pub fn with_method(mut self, method: McMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_prune(mut self, prune: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&prune) {
            return Err(RelaxError::Argument(format!(
                "the prune fraction {prune} is outside [0, 1)"
            )));
        }
        self.prune = prune;
        Ok(self)
    }

    fn sim_seed(&self, unit: &str, model: &str, sim: usize) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        unit.hash(&mut hasher);
        model.hash(&mut hasher);
        sim.hash(&mut hasher);
        hasher.finish()
    }

    /// Randomised data of one simulation.
    ///
    /// Each point is drawn from `N(value, error)`, starting from the fitted
    /// curve or the measured data. Missing points stay missing.
    pub fn create_data<U: FitUnit>(&self, unit: &U, fit: &UnitFit, sim: usize) -> Result<Vec<Option<f64>>> {
        let measured = unit.values();
        let base: Vec<Option<f64>> = match self.method {
            McMethod::Direct => measured,
            McMethod::BackCalc => {
                let back_calc = unit.back_calc(&fit.params)?;
                measured
                    .iter()
                    .zip(back_calc)
                    .map(|(m, b)| m.map(|_| b))
                    .collect()
            }
        };

        let mut rng = StdRng::seed_from_u64(self.sim_seed(unit.name(), &unit.model(), sim));
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| RelaxError::Argument(format!("noise distribution error: {e}")))?;
        Ok(base
            .iter()
            .zip(unit.errors())
            .map(|(v, e)| {
                let z: f64 = normal.sample(&mut rng);
                v.map(|v| v + e * z)
            })
            .collect())
    }

    /// Simulate and refit every fitted unit, then attach parameter errors to
    /// the records.
    ///
    /// Simulations start from the fitted parameters. A unit whose error
    /// analysis fails keeps its record without errors.
    pub fn run<U: FitUnit>(&self, outcome: &FitOutcome<U>, options: &FitOptions) -> Result<Vec<ModelFitRecord>> {
        let jobs: Vec<(usize, usize)> = (0..outcome.fitted.len())
            .flat_map(|u| (0..self.number).map(move |sim| (u, sim)))
            .collect();

        let sims: Vec<(usize, Option<UnitFit>)> = jobs
            .into_par_iter()
            .map(|(u, sim)| {
                let (unit, fit) = &outcome.fitted[u];
                let result = self
                    .create_data(unit, fit, sim)
                    .and_then(|data| unit.with_values(&data).fit(Some(fit.params.as_slice()), options));
                match result {
                    Ok(sim_fit) => (u, Some(sim_fit)),
                    Err(e) => {
                        warn!(unit = unit.name(), sim, "Simulation deselected: {e}");
                        (u, None)
                    }
                }
            })
            .collect();

        let mut per_unit: Vec<Vec<UnitFit>> = vec![Vec::new(); outcome.fitted.len()];
        for (u, sim) in sims {
            if let Some(sim) = sim {
                per_unit[u].push(sim);
            }
        }

        let mut records = Vec::with_capacity(outcome.fitted.len());
        for ((unit, fit), sims) in outcome.fitted.iter().zip(&per_unit) {
            let mut record = unit.record(fit)?;
            match error_analysis(sims, self.prune) {
                Ok(errors) => {
                    for (param, error) in record.params.iter_mut().zip(errors) {
                        param.error = Some(error);
                    }
                }
                Err(e) => warn!(unit = unit.name(), model = %unit.model(), "No Monte Carlo errors: {e}"),
            }
            records.push(record);
        }
        info!(
            units = records.len(),
            sims = self.number,
            method = ?self.method,
            "Monte Carlo simulations finished"
        );
        Ok(records)
    }
}

/// Parameter errors from the simulation fits.
///
/// `floor(n * prune / 2)` simulations are dropped from each end of the sorted
/// chi-squared values before the sample standard deviation is taken.
pub fn error_analysis(sims: &[UnitFit], prune: f64) -> Result<Vec<f64>> {
    let mut order: Vec<&UnitFit> = sims.iter().collect();
    order.sort_by(|a, b| a.stats.chi2.total_cmp(&b.stats.chi2));
    let cut = (sims.len() as f64 * prune / 2.0).floor() as usize;
    let kept = if 2 * cut < order.len() {
        &order[cut..order.len() - cut]
    } else {
        &[][..]
    };
    if kept.len() < 2 {
        return Err(RelaxError::Optimisation(format!(
            "only {} Monte Carlo simulations remain for the error analysis",
            kept.len()
        )));
    }

    let k = kept[0].params.len();
    (0..k)
        .map(|i| {
            let values: Vec<f64> = kept.iter().map(|s| s.params[i]).collect();
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            Ok((ss / (n - 1.0)).sqrt())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CurveType, FitStats};
    use crate::fit::{CurveUnit, fit_units};

    fn sim(chi2: f64, params: Vec<f64>) -> UnitFit {
        UnitFit {
            params,
            stats: FitStats {
                chi2,
                ..FitStats::default()
            },
        }
    }

    fn curve_unit() -> CurveUnit {
        let times = vec![0.0, 0.05, 0.1, 0.2, 0.4, 0.8];
        let values = times.iter().map(|t: &f64| 1e4 * (-5.0 * t).exp()).collect();
        CurveUnit {
            spin_id: ":1@N".into(),
            curve: CurveType::Exp,
            times,
            values,
            errors: vec![100.0; 6],
        }
    }

    #[test]
    fn error_is_sample_sd() {
        let sims = [sim(1.0, vec![1.0, 10.0]), sim(2.0, vec![3.0, 10.0]), sim(3.0, vec![5.0, 10.0])];
        let errors = error_analysis(&sims, 0.0).unwrap();
        assert!((errors[0] - 2.0).abs() < 1e-12);
        assert_eq!(errors[1], 0.0);
    }

    #[test]
    fn pruning_drops_chi2_tails() {
        let sims = [
            sim(100.0, vec![1000.0]),
            sim(1.0, vec![1.0]),
            sim(2.0, vec![2.0]),
            sim(3.0, vec![3.0]),
            sim(0.0, vec![-1000.0]),
        ];
        // Cutting two from each end leaves one simulation.
        assert!(error_analysis(&sims, 0.9).is_err());
        let errors = error_analysis(&sims, 0.5).unwrap();
        assert!((errors[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn too_few_simulations() {
        assert!(error_analysis(&[sim(1.0, vec![1.0])], 0.0).is_err());
        assert!(MonteCarlo::setup(1, 0).is_err());
        assert!(MonteCarlo::setup(10, 0).unwrap().with_prune(1.0).is_err());
    }

    #[test]
    fn simulated_data_repeats_and_keeps_missing_points() {
        let unit = curve_unit();
        let fit = UnitFit {
            params: vec![5.0, 1e4],
            stats: FitStats::default(),
        };
        let mc = MonteCarlo::setup(10, 42).unwrap();
        let a = mc.create_data(&unit, &fit, 3).unwrap();
        let b = mc.create_data(&unit, &fit, 3).unwrap();
        let c = mc.create_data(&unit, &fit, 4).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(Option::is_some));
    }

    #[test]
    fn errors_attached_to_records() {
        let options = FitOptions::default();
        let outcome = fit_units(vec![curve_unit()], &options);
        let mc = MonteCarlo::setup(50, 7).unwrap().with_method(McMethod::Direct);
        let records = mc.run(&outcome, &options).unwrap();
        assert_eq!(records.len(), 1);
        for p in &records[0].params {
            let error = p.error.unwrap();
            assert!(error > 0.0 && error < 0.2 * p.value.abs(), "{p:?}");
        }
    }
}
