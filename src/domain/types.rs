//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - reloaded later for plotting or browsing

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{RelaxError, Result};

/// Which analysis a set-up file describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisKind {
    /// Exponential decay of peak intensities (R1 / R2).
    RelaxFit,
    /// Relaxation dispersion (CPMG or R1rho).
    Dispersion,
}

/// Relaxation curve shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CurveType {
    /// `I0·exp(-Rx·t)`.
    #[default]
    Exp,
    /// `Iinf - (Iinf - I0)·exp(-Rx·t)`.
    Inv,
}

impl CurveType {
    pub fn params(self) -> &'static [ParamName] {
        match self {
            CurveType::Exp => &[ParamName::Rx, ParamName::I0],
            CurveType::Inv => &[ParamName::Rx, ParamName::I0, ParamName::Iinf],
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            CurveType::Exp => "exp",
            CurveType::Inv => "inv",
        }
    }
}

/// Relaxation dispersion experiment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExpType {
    Cpmg,
    R1rho,
}

impl ExpType {
    pub fn display_name(self) -> &'static str {
        match self {
            ExpType::Cpmg => "CPMG",
            ExpType::R1rho => "R1rho",
        }
    }

    /// Label of the dispersion point axis.
    pub fn point_label(self) -> &'static str {
        match self {
            ExpType::Cpmg => "nu_CPMG (Hz)",
            ExpType::R1rho => "Spin-lock field strength (Hz)",
        }
    }

    /// Label of the relaxation rate axis.
    pub fn rate_label(self) -> &'static str {
        match self {
            ExpType::Cpmg => "R2eff (rad.s^-1)",
            ExpType::R1rho => "R1rho (rad.s^-1)",
        }
    }
}

/// How a model parameter is shared across spins and fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamScope {
    /// One value per spin and per spectrometer field.
    SpinField,
    /// One value per spin.
    Spin,
    /// One value shared by the whole cluster.
    Global,
}

/// Every optimisable parameter known to the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamName {
    #[serde(rename = "r2")]
    R2,
    #[serde(rename = "r2a")]
    R2a,
    #[serde(rename = "r2b")]
    R2b,
    #[serde(rename = "dw")]
    Dw,
    #[serde(rename = "phi_ex")]
    PhiEx,
    #[serde(rename = "pA")]
    Pa,
    #[serde(rename = "kex")]
    Kex,
    #[serde(rename = "tex")]
    Tex,
    #[serde(rename = "k_AB")]
    KAb,
    #[serde(rename = "rx")]
    Rx,
    #[serde(rename = "i0")]
    I0,
    #[serde(rename = "iinf")]
    Iinf,
}

impl ParamName {
    pub fn name(self) -> &'static str {
        match self {
            ParamName::R2 => "r2",
            ParamName::R2a => "r2a",
            ParamName::R2b => "r2b",
            ParamName::Dw => "dw",
            ParamName::PhiEx => "phi_ex",
            ParamName::Pa => "pA",
            ParamName::Kex => "kex",
            ParamName::Tex => "tex",
            ParamName::KAb => "k_AB",
            ParamName::Rx => "rx",
            ParamName::I0 => "i0",
            ParamName::Iinf => "iinf",
        }
    }

    pub fn scope(self) -> ParamScope {
        match self {
            ParamName::R2 | ParamName::R2a | ParamName::R2b => ParamScope::SpinField,
            ParamName::Dw | ParamName::PhiEx => ParamScope::Spin,
            ParamName::Pa | ParamName::Kex | ParamName::Tex | ParamName::KAb => ParamScope::Global,
            ParamName::Rx | ParamName::I0 | ParamName::Iinf => ParamScope::Spin,
        }
    }

    pub fn units(self) -> &'static str {
        match self {
            ParamName::R2 | ParamName::R2a | ParamName::R2b | ParamName::Rx => "rad.s^-1",
            ParamName::Dw => "ppm",
            ParamName::PhiEx => "ppm^2",
            ParamName::Pa => "",
            ParamName::Kex | ParamName::KAb => "rad.s^-1",
            ParamName::Tex => "s",
            ParamName::I0 | ParamName::Iinf => "",
        }
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParamName {
    type Err = RelaxError;

    fn from_str(s: &str) -> Result<Self> {
        let p = match s.trim() {
            "r2" => ParamName::R2,
            "r2a" => ParamName::R2a,
            "r2b" => ParamName::R2b,
            "dw" => ParamName::Dw,
            "phi_ex" => ParamName::PhiEx,
            "pA" | "pa" => ParamName::Pa,
            "kex" => ParamName::Kex,
            "tex" => ParamName::Tex,
            "k_AB" | "kab" => ParamName::KAb,
            "rx" => ParamName::Rx,
            "i0" => ParamName::I0,
            "iinf" => ParamName::Iinf,
            other => {
                return Err(RelaxError::Unknown {
                    kind: "parameter",
                    name: other.to_string(),
                });
            }
        };
        Ok(p)
    }
}

/// Relaxation dispersion models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispModel {
    #[serde(rename = "R2eff")]
    R2eff,
    #[serde(rename = "No Rex")]
    NoRex,
    #[serde(rename = "LM63")]
    Lm63,
    #[serde(rename = "CR72")]
    Cr72,
    #[serde(rename = "CR72 full")]
    Cr72Full,
    #[serde(rename = "IT99")]
    It99,
    #[serde(rename = "TSMFK01")]
    Tsmfk01,
    #[serde(rename = "M61")]
    M61,
    #[serde(rename = "M61 skew")]
    M61Skew,
    #[serde(rename = "DPL94")]
    Dpl94,
    #[serde(rename = "NS R1rho 2-site")]
    NsR1rho2Site,
}

pub const ALL_DISP_MODELS: [DispModel; 11] = [
    DispModel::R2eff,
    DispModel::NoRex,
    DispModel::Lm63,
    DispModel::Cr72,
    DispModel::Cr72Full,
    DispModel::It99,
    DispModel::Tsmfk01,
    DispModel::M61,
    DispModel::M61Skew,
    DispModel::Dpl94,
    DispModel::NsR1rho2Site,
];

impl DispModel {
    pub fn display_name(self) -> &'static str {
        match self {
            DispModel::R2eff => "R2eff",
            DispModel::NoRex => "No Rex",
            DispModel::Lm63 => "LM63",
            DispModel::Cr72 => "CR72",
            DispModel::Cr72Full => "CR72 full",
            DispModel::It99 => "IT99",
            DispModel::Tsmfk01 => "TSMFK01",
            DispModel::M61 => "M61",
            DispModel::M61Skew => "M61 skew",
            DispModel::Dpl94 => "DPL94",
            DispModel::NsR1rho2Site => "NS R1rho 2-site",
        }
    }

    /// Experiment type the model applies to. `None` means both.
    pub fn exp_type(self) -> Option<ExpType> {
        match self {
            DispModel::R2eff | DispModel::NoRex => None,
            DispModel::Lm63
            | DispModel::Cr72
            | DispModel::Cr72Full
            | DispModel::It99
            | DispModel::Tsmfk01 => Some(ExpType::Cpmg),
            DispModel::M61 | DispModel::M61Skew | DispModel::Dpl94 | DispModel::NsR1rho2Site => {
                Some(ExpType::R1rho)
            }
        }
    }

    /// Parameters in canonical order.
    ///
    /// The R2eff model has a single per-spin-per-point rate and is handled
    /// separately by the fitting code.
    pub fn params(self) -> &'static [ParamName] {
        use ParamName::*;
        match self {
            DispModel::R2eff => &[],
            DispModel::NoRex => &[R2],
            DispModel::Lm63 => &[R2, PhiEx, Kex],
            DispModel::Cr72 => &[R2, Dw, Pa, Kex],
            DispModel::Cr72Full => &[R2a, R2b, Dw, Pa, Kex],
            DispModel::It99 => &[R2, Dw, Pa, Tex],
            DispModel::Tsmfk01 => &[R2a, Dw, KAb],
            DispModel::M61 => &[R2, PhiEx, Kex],
            DispModel::M61Skew => &[R2, Dw, Pa, Kex],
            DispModel::Dpl94 => &[R2, PhiEx, Kex],
            DispModel::NsR1rho2Site => &[R2, Dw, Pa, Kex],
        }
    }

    /// True for models that need R1 values.
    pub fn needs_r1(self) -> bool {
        matches!(self, DispModel::Dpl94 | DispModel::NsR1rho2Site)
    }

    pub fn is_compatible(self, exp_type: ExpType) -> bool {
        self.exp_type().is_none_or(|t| t == exp_type)
    }
}

impl fmt::Display for DispModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for DispModel {
    type Err = RelaxError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = normalise_model_name(s);
        ALL_DISP_MODELS
            .iter()
            .copied()
            .find(|m| normalise_model_name(m.display_name()) == wanted)
            .ok_or_else(|| RelaxError::Unknown {
                kind: "dispersion model",
                name: s.to_string(),
            })
    }
}

/// Case, space, dash and underscore insensitive model name.
fn normalise_model_name(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Information criterion used for model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum SelectionMethod {
    #[serde(rename = "AIC")]
    #[value(name = "AIC")]
    #[default]
    Aic,
    #[serde(rename = "AICc")]
    #[value(name = "AICc")]
    Aicc,
    #[serde(rename = "BIC")]
    #[value(name = "BIC")]
    Bic,
}

impl SelectionMethod {
    pub fn display_name(self) -> &'static str {
        match self {
            SelectionMethod::Aic => "AIC",
            SelectionMethod::Aicc => "AICc",
            SelectionMethod::Bic => "BIC",
        }
    }
}

impl FromStr for SelectionMethod {
    type Err = RelaxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "AIC" => Ok(SelectionMethod::Aic),
            "AICc" => Ok(SelectionMethod::Aicc),
            "BIC" => Ok(SelectionMethod::Bic),
            other => Err(RelaxError::Unknown {
                kind: "model selection method",
                name: other.to_string(),
            }),
        }
    }
}

/// Source data for Monte Carlo simulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum McMethod {
    /// Randomise the back-calculated values of the fitted model.
    #[default]
    BackCalc,
    /// Randomise the measured values.
    Direct,
}

/// Optimiser bookkeeping of a single fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitStats {
    pub chi2: f64,
    /// Number of fitted parameters.
    pub k: usize,
    /// Number of data points.
    pub n: usize,
    pub iterations: usize,
    pub f_count: usize,
    pub g_count: usize,
    pub h_count: usize,
    pub warning: Option<String>,
}

/// A named parameter value attached to a spin (and field, for per-field rates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamValue {
    pub name: ParamName,
    pub spin_id: Option<String>,
    pub field_mhz: Option<f64>,
    pub value: f64,
    pub error: Option<f64>,
}

/// One plottable data series: measured points and the fitted curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveSeries {
    pub spin_id: String,
    pub label: String,
    pub x: Vec<f64>,
    /// Measured values (`None` marks a missing point).
    pub y: Vec<Option<f64>>,
    pub errors: Vec<Option<f64>>,
    pub back_calc: Vec<f64>,
}

/// Fit of one model to one unit (a single spin or a spin cluster).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFitRecord {
    /// Unit identifier: the spin ID or the cluster name.
    pub unit: String,
    pub spins: Vec<String>,
    /// Model name (dispersion model or curve type).
    pub model: String,
    pub params: Vec<ParamValue>,
    pub stats: FitStats,
    /// Value of the information criterion, when model selection ran.
    pub criterion: Option<f64>,
    pub selected: bool,
    pub curves: Vec<CurveSeries>,
}

/// A saved results file (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsFile {
    pub tool: String,
    pub created: DateTime<Local>,
    pub analysis: AnalysisKind,
    pub x_label: String,
    pub y_label: String,
    pub selection_method: Option<SelectionMethod>,
    pub monte_carlo_sims: usize,
    pub fits: Vec<ModelFitRecord>,
}

impl ResultsFile {
    /// Units in order of first appearance.
    pub fn units(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for f in &self.fits {
            if !out.contains(&f.unit.as_str()) {
                out.push(&f.unit);
            }
        }
        out
    }

    /// Models fitted to a unit, in fit order.
    pub fn fits_for(&self, unit: &str) -> Vec<&ModelFitRecord> {
        self.fits.iter().filter(|f| f.unit == unit).collect()
    }

    /// The selected fit of a unit, or the first when none was selected.
    pub fn best_for(&self, unit: &str) -> Option<&ModelFitRecord> {
        let fits = self.fits_for(unit);
        fits.iter()
            .find(|f| f.selected)
            .or_else(|| fits.first())
            .copied()
    }
}
