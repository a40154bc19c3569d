//! Grace (`.agr`) plot files.

use std::path::{Path, PathBuf};

use crate::domain::{CurveSeries, ParamName, ResultsFile};
use crate::error::{RelaxError, Result};

/// One Grace data set.
#[derive(Debug, Clone, PartialEq)]
pub struct GraceSet {
    pub legend: String,
    /// `(x, y, dy)` rows. Sets without errors are written as `xy`.
    pub points: Vec<(f64, f64, Option<f64>)>,
    /// Draw a line through the points instead of symbols.
    pub line: bool,
}

impl GraceSet {
    fn has_errors(&self) -> bool {
        self.points.iter().any(|p| p.2.is_some())
    }
}

/// Render the sets of one graph, with axis labels, as Grace text.
pub fn render_xy(sets: &[GraceSet], x_label: &str, y_label: &str) -> String {
    let mut out = String::new();
    out.push_str("@with g0\n");
    for (axis, label) in [("xaxis", x_label), ("yaxis", y_label)] {
        out.push_str(&format!("@    {axis}  label \"{label}\"\n"));
        out.push_str(&format!("@    {axis}  label char size 1.48\n"));
        out.push_str(&format!("@    {axis}  tick major size 0.75\n"));
        out.push_str(&format!("@    {axis}  tick major linewidth 0.5\n"));
        out.push_str(&format!("@    {axis}  tick minor linewidth 0.5\n"));
        out.push_str(&format!("@    {axis}  tick minor size 0.45\n"));
        out.push_str(&format!("@    {axis}  ticklabel char size 1.00\n"));
    }
    out.push_str("@    frame linewidth 0.5\n");

    for (i, set) in sets.iter().enumerate() {
        out.push_str(&format!("@    s{i} legend \"{}\"\n", set.legend));
        if set.line {
            out.push_str(&format!("@    s{i} symbol 0\n"));
            out.push_str(&format!("@    s{i} line linestyle 1\n"));
        } else {
            out.push_str(&format!("@    s{i} symbol 9\n"));
            out.push_str(&format!("@    s{i} symbol size 1.00\n"));
            out.push_str(&format!("@    s{i} symbol fill pattern 1\n"));
            out.push_str(&format!("@    s{i} symbol linewidth 0.5\n"));
            out.push_str(&format!("@    s{i} line linestyle 0\n"));
        }
        out.push_str(&format!("@    s{i} errorbar size 0.5\n"));
        out.push_str(&format!("@    s{i} errorbar linewidth 0.5\n"));
        out.push_str(&format!("@    s{i} errorbar riser linewidth 0.5\n"));
    }

    for (i, set) in sets.iter().enumerate() {
        let errors = set.has_errors();
        out.push_str(&format!("@target G0.S{i}\n"));
        out.push_str(if errors { "@type xydy\n" } else { "@type xy\n" });
        for &(x, y, dy) in &set.points {
            if errors {
                out.push_str(&format!("{x:<30}{y:<30}{:<30}\n", dy.unwrap_or(0.0)));
            } else {
                out.push_str(&format!("{x:<30}{y:<30}\n"));
            }
        }
        out.push_str("&\n");
    }
    out
}

/// Write one graph to `path`.
pub fn write_xy(path: &Path, sets: &[GraceSet], x_label: &str, y_label: &str) -> Result<()> {
    std::fs::write(path, render_xy(sets, x_label, y_label)).map_err(|e| RelaxError::io(path, e))
}

/// Measured points (with errors) and the back-calculated curve of a series.
pub fn curve_sets(series: &CurveSeries) -> Vec<GraceSet> {
    let measured = series
        .x
        .iter()
        .zip(&series.y)
        .zip(&series.errors)
        .filter_map(|((&x, y), e)| y.map(|y| (x, y, Some(e.unwrap_or(0.0)))))
        .collect();
    let mut fitted: Vec<(f64, f64, Option<f64>)> = series
        .x
        .iter()
        .zip(&series.back_calc)
        .map(|(&x, &y)| (x, y, None))
        .collect();
    fitted.sort_by(|a, b| a.0.total_cmp(&b.0));

    vec![
        GraceSet {
            legend: format!("{} {}", series.spin_id, series.label),
            points: measured,
            line: false,
        },
        GraceSet {
            legend: format!("{} {} fit", series.spin_id, series.label),
            points: fitted,
            line: true,
        },
    ]
}

/// Residue number of a spin ID such as `#mol:12@N`.
pub fn residue_number(spin_id: &str) -> Option<i64> {
    let rest = &spin_id[spin_id.find(':')? + 1..];
    let end = rest.find('@').unwrap_or(rest.len());
    rest[..end].trim().parse().ok()
}

/// A parameter of the selected fits against residue number.
///
/// Per-field parameters give one set per field.
pub fn param_vs_residue(results: &ResultsFile, param: ParamName) -> Vec<GraceSet> {
    let mut sets: Vec<GraceSet> = Vec::new();
    for unit in results.units() {
        let Some(fit) = results.best_for(unit) else {
            continue;
        };
        for spin in &fit.spins {
            let Some(res_num) = residue_number(spin) else {
                continue;
            };
            let values = fit
                .params
                .iter()
                .filter(|p| p.name == param && p.spin_id.as_ref().is_none_or(|id| id == spin));
            for p in values {
                let legend = match p.field_mhz {
                    Some(frq) => format!("{param} {frq} MHz"),
                    None => param.to_string(),
                };
                let point = (res_num as f64, p.value, p.error);
                match sets.iter_mut().find(|s| s.legend == legend) {
                    Some(set) => set.points.push(point),
                    None => sets.push(GraceSet {
                        legend,
                        points: vec![point],
                        line: false,
                    }),
                }
            }
        }
    }
    for set in &mut sets {
        set.points.sort_by(|a, b| a.0.total_cmp(&b.0));
    }
    sets
}

/// File-name safe form of a spin ID or parameter name.
fn file_stem(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Write a curve plot per spin of each selected fit and a per-residue plot per
/// parameter. Returns the written paths.
pub fn write_grace_dir(dir: &Path, results: &ResultsFile) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| RelaxError::io(dir, e))?;
    let mut written = Vec::new();

    let mut params: Vec<ParamName> = Vec::new();
    for unit in results.units() {
        let Some(fit) = results.best_for(unit) else {
            continue;
        };
        for series in &fit.curves {
            let path = dir.join(format!("curve_{}.agr", file_stem(&series.spin_id)));
            write_xy(&path, &curve_sets(series), &results.x_label, &results.y_label)?;
            written.push(path);
        }
        for p in &fit.params {
            if !params.contains(&p.name) {
                params.push(p.name);
            }
        }
    }

    for param in params {
        let sets = param_vs_residue(results, param);
        if sets.is_empty() {
            continue;
        }
        let path = dir.join(format!("{}.agr", file_stem(param.name())));
        let y_label = match param.units() {
            "" => param.name().to_string(),
            units => format!("{}\\N ({units})", param.name()),
        };
        write_xy(&path, &sets, "Residue number", &y_label)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xydy_blocks_end_with_ampersand() {
        let set = GraceSet {
            legend: "R2".into(),
            points: vec![(1.0, 10.0, Some(0.5)), (2.0, 11.0, Some(0.25))],
            line: false,
        };
        let text = render_xy(&[set], "Residue number", "R2");
        assert!(text.starts_with("@with g0\n"));
        assert!(text.contains("@    xaxis  label \"Residue number\"\n"));
        assert!(text.contains("@target G0.S0\n@type xydy\n"));
        let data: Vec<&str> = text.lines().skip_while(|l| !l.starts_with("@type")).collect();
        assert_eq!(data.len(), 4);
        assert_eq!(data[1].split_whitespace().collect::<Vec<_>>(), ["1", "10", "0.5"]);
        assert_eq!(data[3], "&");
    }

    #[test]
    fn curve_sets_skip_missing_points() {
        let series = CurveSeries {
            spin_id: ":7@N".into(),
            label: "600 MHz".into(),
            x: vec![200.0, 50.0, 100.0],
            y: vec![Some(9.0), Some(12.0), None],
            errors: vec![Some(0.3), Some(0.3), None],
            back_calc: vec![9.1, 11.8, 10.2],
        };
        let sets = curve_sets(&series);
        assert_eq!(sets[0].points.len(), 2);
        assert_eq!(sets[1].points.iter().map(|p| p.0).collect::<Vec<_>>(), [50.0, 100.0, 200.0]);

        let text = render_xy(&sets, "x", "y");
        assert!(text.contains("@target G0.S1\n@type xy\n"));
    }

    #[test]
    fn residue_numbers_from_ids() {
        assert_eq!(residue_number(":12@N"), Some(12));
        assert_eq!(residue_number("#Ubi:-3@N"), Some(-3));
        assert_eq!(residue_number("@N"), None);
        assert_eq!(file_stem(":12@N"), "12_N");
    }
}
