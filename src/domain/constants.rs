//! Physical constants and nucleus properties.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RelaxError, Result};

/// Planck constant (J·s).
pub const H: f64 = 6.62606876e-34;

/// Dirac constant, `h / 2π`.
pub const H_BAR: f64 = H / (2.0 * PI);

/// Permeability of free space.
pub const MU0: f64 = 4.0 * PI * 1e-7;

/// 15N chemical shift anisotropy (unitless).
pub const N15_CSA: f64 = -172e-6;

/// Length of the NH bond (m).
pub const NH_BOND_LENGTH: f64 = 1.02e-10;

pub const G1H: f64 = 26.7522212e7;
pub const G13C: f64 = 6.728e7;
pub const G15N: f64 = -2.7126e7;
pub const G17O: f64 = -3.628e7;
pub const G31P: f64 = 10.841e7;

const AR_H: f64 = 1.00794;
const AR_C: f64 = 12.0107;
const AR_N: f64 = 14.0067;
const AR_O: f64 = 15.9994;
const AR_S: f64 = 32.065;

/// Magnetically active nuclei with a known gyromagnetic ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Isotope {
    #[serde(rename = "1H")]
    H1,
    #[serde(rename = "13C")]
    C13,
    #[serde(rename = "15N")]
    N15,
    #[serde(rename = "17O")]
    O17,
    #[serde(rename = "31P")]
    P31,
}

impl Isotope {
    pub fn label(self) -> &'static str {
        match self {
            Isotope::H1 => "1H",
            Isotope::C13 => "13C",
            Isotope::N15 => "15N",
            Isotope::O17 => "17O",
            Isotope::P31 => "31P",
        }
    }

    /// Gyromagnetic ratio in rad·s⁻¹·T⁻¹.
    pub fn gyromagnetic_ratio(self) -> f64 {
        match self {
            Isotope::H1 => G1H,
            Isotope::C13 => G13C,
            Isotope::N15 => G15N,
            Isotope::O17 => G17O,
            Isotope::P31 => G31P,
        }
    }
}

impl fmt::Display for Isotope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Isotope {
    type Err = RelaxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1H" => Ok(Isotope::H1),
            "13C" => Ok(Isotope::C13),
            "15N" => Ok(Isotope::N15),
            "17O" => Ok(Isotope::O17),
            "31P" => Ok(Isotope::P31),
            other => Err(RelaxError::Unknown {
                kind: "isotope",
                name: other.to_string(),
            }),
        }
    }
}

/// Gyromagnetic ratio for an isotope label such as `"15N"`.
pub fn gyromagnetic_ratio(isotope: &str) -> Result<f64> {
    Ok(isotope.parse::<Isotope>()?.gyromagnetic_ratio())
}

/// Atomic mass of an element, or the mass number of a specific isotope.
pub fn atomic_mass(element: &str) -> Result<f64> {
    let mass = match element.trim() {
        "H" => AR_H,
        "1H" => 1.0,
        "2H" => 2.0,
        "C" => AR_C,
        "12C" => 12.0,
        "13C" => 13.0,
        "N" => AR_N,
        "14N" => 14.0,
        "15N" => 15.0,
        "O" => AR_O,
        "16O" => 16.0,
        "17O" => 17.0,
        "S" => AR_S,
        other => {
            return Err(RelaxError::Unknown {
                kind: "element",
                name: other.to_string(),
            });
        }
    };
    Ok(mass)
}

/// Factor converting a ppm value of the given nucleus into rad/s.
///
/// `proton_frq_hz` is the spectrometer proton frequency. The nucleus frequency
/// follows from the ratio of gyromagnetic ratios.
pub fn frequency_to_rad_per_s(proton_frq_hz: f64, isotope: Isotope) -> f64 {
    2.0 * PI * proton_frq_hz * isotope.gyromagnetic_ratio() / G1H * 1e-6
}

/// Factor converting a ppm value of the given nucleus into Hz.
pub fn frequency_to_hz(proton_frq_hz: f64, isotope: Isotope) -> f64 {
    proton_frq_hz * isotope.gyromagnetic_ratio() / G1H * 1e-6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h_bar_is_h_over_two_pi() {
        assert!((H_BAR * 2.0 * PI - H).abs() < 1e-45);
    }

    #[test]
    fn isotope_round_trips_through_labels() {
        for iso in [Isotope::H1, Isotope::C13, Isotope::N15, Isotope::O17, Isotope::P31] {
            assert_eq!(iso.label().parse::<Isotope>().unwrap(), iso);
        }
        assert!("2H".parse::<Isotope>().is_err());
    }

    #[test]
    fn gyromagnetic_ratios_match_table() {
        assert_eq!(gyromagnetic_ratio("15N").unwrap(), -2.7126e7);
        assert_eq!(gyromagnetic_ratio("1H").unwrap(), 26.7522212e7);
        assert!(gyromagnetic_ratio("X").is_err());
    }

    #[test]
    fn atomic_masses() {
        assert_eq!(atomic_mass("15N").unwrap(), 15.0);
        assert_eq!(atomic_mass("C").unwrap(), 12.0107);
        assert!(matches!(atomic_mass("Fe"), Err(RelaxError::Unknown { .. })));
    }

    #[test]
    fn proton_ppm_conversion_is_two_pi_mhz() {
        // 1 ppm of 1H at 600 MHz is 600 Hz.
        let f = frequency_to_rad_per_s(600e6, Isotope::H1);
        assert!((f - 2.0 * PI * 600.0).abs() < 1e-9);
        assert!((frequency_to_hz(600e6, Isotope::H1) - 600.0).abs() < 1e-9);

        // 15N is about a tenth of the proton frequency, with a negative sign.
        let f_n = frequency_to_hz(600e6, Isotope::N15);
        assert!(f_n < 0.0 && (f_n.abs() - 60.8).abs() < 0.1);
    }
}
