//! Synthetic dispersion data from a model and known parameters.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{DispModel, ExpType, Isotope, ParamName, frequency_to_rad_per_s};
use crate::error::{RelaxError, Result};
use crate::io::R2effPoint;
use crate::target::{DispersionTarget, FieldPoints, ParamLayout, SpinFieldData};

#[derive(Debug, Clone, PartialEq)]
pub struct SimulateConfig {
    pub model: DispModel,
    /// Experiment type, for the models that apply to both.
    pub exp_type: ExpType,
    pub params: Vec<(ParamName, f64)>,
    pub spin_id: String,
    pub isotope: Isotope,
    pub frq_mhz: f64,
    /// CPMG frequencies or spin-lock fields, in Hz.
    pub points: Vec<f64>,
    pub relax_time: f64,
    /// Resonance offset from the spin-lock carrier, in ppm.
    pub offset_ppm: f64,
    pub r1: Option<f64>,
    /// Standard deviation of the Gaussian noise, in s⁻¹.
    pub noise: f64,
    pub seed: u64,
}

/// Parse `name=value` pairs separated by commas, such as `r2=10,kex=1500`.
pub fn parse_params(text: &str) -> Result<Vec<(ParamName, f64)>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                RelaxError::Argument(format!("expected name=value, found '{pair}'"))
            })?;
            let value = value.trim().parse::<f64>().map_err(|_| {
                RelaxError::Argument(format!("invalid value for '{}': '{value}'", name.trim()))
            })?;
            Ok((name.parse()?, value))
        })
        .collect()
}

fn simulation_seed(config: &SimulateConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.model.hash(&mut hasher);
    config.spin_id.hash(&mut hasher);
    config.frq_mhz.to_bits().hash(&mut hasher);
    for p in &config.points {
        p.to_bits().hash(&mut hasher);
    }
    config.seed.hash(&mut hasher);
    hasher.finish()
}

/// Back-calculate the model at every point and add Gaussian noise.
///
/// The noise level is stored as the error of every point.
pub fn simulate_r2eff(config: &SimulateConfig) -> Result<Vec<R2effPoint>> {
    if config.model == DispModel::R2eff {
        return Err(RelaxError::Argument(
            "the R2eff model has no parameters to simulate from".to_string(),
        ));
    }
    if config.points.is_empty() {
        return Err(RelaxError::Argument("no dispersion points given".to_string()));
    }
    if !(config.noise > 0.0) {
        return Err(RelaxError::Argument(format!(
            "the noise level must be positive, got {}",
            config.noise
        )));
    }

    let layout = ParamLayout::new(config.model, 1, 1);
    let mut params = Vec::with_capacity(layout.param_num());
    for slot in layout.slots() {
        let value = config
            .params
            .iter()
            .find(|(name, _)| *name == slot.name)
            .map(|(_, v)| *v)
            .ok_or_else(|| {
                RelaxError::MissingData(format!(
                    "the {} model needs a value for '{}'",
                    config.model, slot.name
                ))
            })?;
        params.push(value);
    }
    if let Some((name, _)) = config
        .params
        .iter()
        .find(|(name, _)| !config.model.params().contains(name))
    {
        return Err(RelaxError::Argument(format!(
            "'{name}' is not a parameter of the {} model",
            config.model
        )));
    }

    let frq_hz = config.frq_mhz * 1e6;
    let frq_factor = frequency_to_rad_per_s(frq_hz, config.isotope);
    let n = config.points.len();
    let field = FieldPoints {
        proton_frq_hz: frq_hz,
        points_hz: config.points.clone(),
        relax_times: vec![config.relax_time; n],
    };
    let data = SpinFieldData {
        values: vec![0.0; n],
        errors: vec![1.0; n],
        missing: vec![false; n],
        frq_factor,
        offsets: vec![config.offset_ppm * frq_factor; n],
        r1: config.r1,
    };
    let target = DispersionTarget::new(
        layout,
        config.exp_type,
        vec![field],
        vec![vec![data]],
        vec![1.0; params.len()],
    )?;
    let curve = target.back_calc(&params).remove(0).remove(0);

    let mut rng = StdRng::seed_from_u64(simulation_seed(config));
    let normal = Normal::new(0.0, config.noise)
        .map_err(|e| RelaxError::Argument(format!("noise distribution error: {e}")))?;
    Ok(config
        .points
        .iter()
        .zip(curve)
        .map(|(&point_hz, value)| R2effPoint {
            spin_id: config.spin_id.clone(),
            point_hz,
            value: value + normal.sample(&mut rng),
            error: config.noise,
        })
        .collect())
}
