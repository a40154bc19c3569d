//! Synthetic data generation.

pub mod synthetic;

pub use synthetic::{SimulateConfig, parse_params, simulate_r2eff};
