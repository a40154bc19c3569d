//! Relaxation dispersion target function.
//!
//! A target covers one fit unit: a single spin or a cluster of spins that
//! share the global exchange parameters. Data are indexed as
//! `[spin][field][point]`.

use std::f64::consts::PI;

use crate::domain::{DispModel, ExpType, ParamName, ParamScope};
use crate::error::{RelaxError, Result};
use crate::math::chi2;
use crate::minimise::TargetFunction;
use crate::models::{
    NsR1rhoParams, r1rho_dpl94, r1rho_m61, r1rho_m61_skew, r1rho_ns_2site, r2eff_cr72, r2eff_it99,
    r2eff_lm63, r2eff_tsmfk01,
};

use super::mask_missing;

/// One entry of the parameter vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSlot {
    pub name: ParamName,
    pub spin: Option<usize>,
    pub field: Option<usize>,
}

/// Ordering of a model's parameters for a cluster of spins.
///
/// 1. every r2-type parameter, for each spin and then each field
/// 2. every per-spin parameter, for each spin
/// 3. the global parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ParamLayout {
    model: DispModel,
    n_spins: usize,
    n_fields: usize,
    slots: Vec<ParamSlot>,
}

impl ParamLayout {
    pub fn new(model: DispModel, n_spins: usize, n_fields: usize) -> Self {
        let mut slots = Vec::new();
        for scope in [ParamScope::SpinField, ParamScope::Spin, ParamScope::Global] {
            for &name in model.params().iter().filter(|p| p.scope() == scope) {
                match scope {
                    ParamScope::SpinField => {
                        for spin in 0..n_spins {
                            for field in 0..n_fields {
                                slots.push(ParamSlot {
                                    name,
                                    spin: Some(spin),
                                    field: Some(field),
                                });
                            }
                        }
                    }
                    ParamScope::Spin => {
                        for spin in 0..n_spins {
                            slots.push(ParamSlot {
                                name,
                                spin: Some(spin),
                                field: None,
                            });
                        }
                    }
                    ParamScope::Global => slots.push(ParamSlot {
                        name,
                        spin: None,
                        field: None,
                    }),
                }
            }
        }
        Self {
            model,
            n_spins,
            n_fields,
            slots,
        }
    }

    pub fn model(&self) -> DispModel {
        self.model
    }

    pub fn n_spins(&self) -> usize {
        self.n_spins
    }

    pub fn n_fields(&self) -> usize {
        self.n_fields
    }

    pub fn param_num(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }

    /// Position of a parameter in the vector.
    ///
    /// `spin` and `field` are ignored for parameters that do not depend on
    /// them.
    pub fn index(&self, name: ParamName, spin: usize, field: usize) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.name == name
                && s.spin.is_none_or(|sp| sp == spin)
                && s.field.is_none_or(|f| f == field)
        })
    }
}

/// Dispersion points recorded at one spectrometer field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPoints {
    pub proton_frq_hz: f64,
    /// CPMG frequencies or spin-lock field strengths, in Hz.
    pub points_hz: Vec<f64>,
    /// Relaxation time of each point, in s.
    pub relax_times: Vec<f64>,
}

/// Measured data of one spin at one field.
#[derive(Debug, Clone, PartialEq)]
pub struct SpinFieldData {
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
    pub missing: Vec<bool>,
    /// Conversion factor from ppm to rad/s for this spin at this field.
    pub frq_factor: f64,
    /// Resonance offset Ω from the spin-lock carrier for each point, in rad/s.
    pub offsets: Vec<f64>,
    pub r1: Option<f64>,
}

/// Chi-squared of a dispersion model over a fit unit.
#[derive(Debug, Clone)]
pub struct DispersionTarget {
    layout: ParamLayout,
    fields: Vec<FieldPoints>,
    /// Spin-lock fields in rad/s, per field.
    w1: Vec<Vec<f64>>,
    data: Vec<Vec<SpinFieldData>>,
    scaling: Vec<f64>,
}

impl DispersionTarget {
    pub fn new(
        layout: ParamLayout,
        exp_type: ExpType,
        fields: Vec<FieldPoints>,
        data: Vec<Vec<SpinFieldData>>,
        scaling: Vec<f64>,
    ) -> Result<Self> {
        let model = layout.model();
        if model == DispModel::R2eff {
            return Err(RelaxError::Argument(
                "the R2eff model has no target function".to_string(),
            ));
        }
        if !model.is_compatible(exp_type) {
            return Err(RelaxError::Argument(format!(
                "the {model} model does not apply to {} data",
                exp_type.display_name()
            )));
        }
        check_len("fields", layout.n_fields(), fields.len())?;
        check_len("spins", layout.n_spins(), data.len())?;
        check_len("parameter scaling", layout.param_num(), scaling.len())?;

        for field in &fields {
            check_len("relaxation times", field.points_hz.len(), field.relax_times.len())?;
        }
        for spin in &data {
            check_len("fields per spin", fields.len(), spin.len())?;
            for (d, field) in spin.iter().zip(&fields) {
                let n = field.points_hz.len();
                check_len("dispersion values", n, d.values.len())?;
                check_len("dispersion errors", n, d.errors.len())?;
                check_len("missing flags", n, d.missing.len())?;
                check_len("offsets", n, d.offsets.len())?;
                if model.needs_r1() && d.r1.is_none() {
                    return Err(RelaxError::MissingData(format!(
                        "R1 relaxation rates are required by the {model} model"
                    )));
                }
            }
        }

        let w1 = fields
            .iter()
            .map(|f| f.points_hz.iter().map(|nu| 2.0 * PI * nu).collect())
            .collect();

        Ok(Self {
            layout,
            fields,
            w1,
            data,
            scaling,
        })
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn scaling(&self) -> &[f64] {
        &self.scaling
    }

    /// Number of measured (non-missing) points.
    pub fn num_points(&self) -> usize {
        self.data
            .iter()
            .flatten()
            .map(|d| d.missing.iter().filter(|m| !**m).count())
            .sum()
    }

    /// Back-calculated curves, `[spin][field][point]`, for a scaled vector.
    pub fn back_calc(&self, x: &[f64]) -> Vec<Vec<Vec<f64>>> {
        let params: Vec<f64> = x.iter().zip(&self.scaling).map(|(v, s)| v * s).collect();
        (0..self.layout.n_spins())
            .map(|spin| {
                (0..self.fields.len())
                    .map(|field| {
                        let mut out = vec![0.0; self.fields[field].points_hz.len()];
                        self.curve(&params, spin, field, &mut out);
                        out
                    })
                    .collect()
            })
            .collect()
    }

    fn param(&self, params: &[f64], name: ParamName, spin: usize, field: usize) -> f64 {
        self.layout
            .index(name, spin, field)
            .map_or(0.0, |i| params[i])
    }

    fn curve(&self, params: &[f64], spin: usize, field: usize, out: &mut [f64]) {
        use ParamName::*;
        let p = |name| self.param(params, name, spin, field);
        let d = &self.data[spin][field];
        let points = &self.fields[field];
        let w1 = &self.w1[field];
        let dw = p(Dw) * d.frq_factor;
        let phi_ex = p(PhiEx) * d.frq_factor * d.frq_factor;

        match self.layout.model() {
            DispModel::R2eff | DispModel::NoRex => out.fill(p(R2)),
            DispModel::Lm63 => r2eff_lm63(p(R2), phi_ex, p(Kex), &points.points_hz, out),
            DispModel::Cr72 => {
                let r20 = p(R2);
                r2eff_cr72(r20, r20, p(Pa), dw, p(Kex), &points.points_hz, out);
            }
            DispModel::Cr72Full => {
                r2eff_cr72(p(R2a), p(R2b), p(Pa), dw, p(Kex), &points.points_hz, out)
            }
            DispModel::It99 => r2eff_it99(p(R2), p(Pa), dw, p(Tex), &points.points_hz, out),
            DispModel::Tsmfk01 => r2eff_tsmfk01(p(R2a), dw, p(KAb), &points.points_hz, out),
            DispModel::M61 => r1rho_m61(p(R2), phi_ex, p(Kex), w1, &d.offsets, out),
            DispModel::M61Skew => r1rho_m61_skew(p(R2), p(Pa), dw, p(Kex), w1, out),
            DispModel::Dpl94 => r1rho_dpl94(
                p(R2),
                phi_ex,
                p(Kex),
                d.r1.unwrap_or_default(),
                w1,
                &d.offsets,
                out,
            ),
            DispModel::NsR1rho2Site => {
                let ns = NsR1rhoParams {
                    r1rho_prime: p(R2),
                    r1: d.r1.unwrap_or_default(),
                    pa: p(Pa),
                    dw,
                    kex: p(Kex),
                };
                r1rho_ns_2site(&ns, w1, &d.offsets, &points.relax_times, out);
            }
        }
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(RelaxError::LengthMismatch {
            what,
            expected,
            found,
        })
    }
}

impl TargetFunction for DispersionTarget {
    fn func(&self, x: &[f64]) -> f64 {
        let params: Vec<f64> = x.iter().zip(&self.scaling).map(|(v, s)| v * s).collect();
        let mut back_calc = Vec::new();
        let mut values = Vec::new();
        let mut total = 0.0;
        for (spin, per_field) in self.data.iter().enumerate() {
            for (field, d) in per_field.iter().enumerate() {
                back_calc.clear();
                back_calc.resize(d.values.len(), 0.0);
                self.curve(&params, spin, field, &mut back_calc);
                mask_missing(&d.values, &back_calc, &d.missing, &mut values);
                total += chi2(&values, &back_calc, &d.errors);
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Isotope, frequency_to_rad_per_s};

    fn cpmg_field(frq_mhz: f64) -> FieldPoints {
        let points_hz: Vec<f64> = [50.0, 100.0, 200.0, 400.0, 800.0, 1000.0].to_vec();
        FieldPoints {
            proton_frq_hz: frq_mhz * 1e6,
            relax_times: vec![0.04; points_hz.len()],
            points_hz,
        }
    }

    fn spin_data(field: &FieldPoints, values: Vec<f64>) -> SpinFieldData {
        let n = values.len();
        SpinFieldData {
            values,
            errors: vec![0.5; n],
            missing: vec![false; n],
            frq_factor: frequency_to_rad_per_s(field.proton_frq_hz, Isotope::N15),
            offsets: vec![0.0; n],
            r1: None,
        }
    }

    #[test]
    fn layout_matches_relax_parameter_counts() {
        assert_eq!(ParamLayout::new(DispModel::Cr72, 1, 1).param_num(), 4);
        assert_eq!(ParamLayout::new(DispModel::Cr72, 2, 1).param_num(), 6);
        assert_eq!(ParamLayout::new(DispModel::Cr72Full, 2, 2).param_num(), 12);
        assert_eq!(ParamLayout::new(DispModel::NoRex, 3, 2).param_num(), 6);
        assert_eq!(ParamLayout::new(DispModel::Lm63, 1, 2).param_num(), 4);
    }

    #[test]
    fn layout_order_and_index() {
        let layout = ParamLayout::new(DispModel::Cr72Full, 2, 2);
        let names: Vec<ParamName> = layout.slots().iter().map(|s| s.name).collect();
        use ParamName::*;
        assert_eq!(
            names,
            vec![R2a, R2a, R2a, R2a, R2b, R2b, R2b, R2b, Dw, Dw, Pa, Kex]
        );
        // r20 of spin 1 at field 0 sits at frq + spin·num_frq.
        assert_eq!(layout.index(R2a, 1, 0), Some(2));
        assert_eq!(layout.index(R2b, 0, 1), Some(5));
        assert_eq!(layout.index(Dw, 1, 1), Some(9));
        assert_eq!(layout.index(Kex, 1, 1), Some(11));
        assert_eq!(layout.index(Tex, 0, 0), None);
    }

    #[test]
    fn chi2_vanishes_for_exact_data() {
        let field = cpmg_field(600.0);
        let layout = ParamLayout::new(DispModel::Cr72, 1, 1);
        let truth = [12.0, 1.5, 0.9, 1500.0];
        let scaling = vec![1.0; 4];

        let probe = DispersionTarget::new(
            layout.clone(),
            ExpType::Cpmg,
            vec![field.clone()],
            vec![vec![spin_data(&field, vec![0.0; 6])]],
            scaling.clone(),
        )
        .unwrap();
        let values = probe.back_calc(&truth)[0][0].clone();
        assert!(values[0] > values[5]);

        let target = DispersionTarget::new(
            layout,
            ExpType::Cpmg,
            vec![field.clone()],
            vec![vec![spin_data(&field, values)]],
            scaling,
        )
        .unwrap();
        assert!(target.func(&truth) < 1e-20);
        assert!(target.func(&[12.0, 1.0, 0.9, 1500.0]) > 1.0);
        assert_eq!(target.num_points(), 6);
    }

    #[test]
    fn missing_points_add_nothing() {
        let field = cpmg_field(600.0);
        let mut d = spin_data(&field, vec![10.0; 6]);
        d.values[2] = 1e6;
        d.missing[2] = true;
        let target = DispersionTarget::new(
            ParamLayout::new(DispModel::NoRex, 1, 1),
            ExpType::Cpmg,
            vec![field],
            vec![vec![d]],
            vec![10.0],
        )
        .unwrap();
        assert!(target.func(&[1.0]).abs() < 1e-20);
        assert_eq!(target.num_points(), 5);
    }

    #[test]
    fn construction_errors() {
        let field = cpmg_field(600.0);
        let make = |model, exp_type, scaling: Vec<f64>| {
            DispersionTarget::new(
                ParamLayout::new(model, 1, 1),
                exp_type,
                vec![field.clone()],
                vec![vec![spin_data(&field, vec![10.0; 6])]],
                scaling,
            )
        };
        assert!(matches!(
            make(DispModel::R2eff, ExpType::Cpmg, vec![]),
            Err(RelaxError::Argument(_))
        ));
        assert!(matches!(
            make(DispModel::M61, ExpType::Cpmg, vec![1.0; 3]),
            Err(RelaxError::Argument(_))
        ));
        assert!(matches!(
            make(DispModel::Lm63, ExpType::Cpmg, vec![1.0; 2]),
            Err(RelaxError::LengthMismatch { .. })
        ));
        assert!(matches!(
            make(DispModel::Dpl94, ExpType::R1rho, vec![1.0; 3]),
            Err(RelaxError::MissingData(_))
        ));
    }
}
