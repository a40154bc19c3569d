//! ASCII/Unicode plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - measured points: `o`
//! - back-calculated curve: `-` line
//! - missing points are left blank

use crate::domain::{CurveSeries, ModelFitRecord, ResultsFile};
use crate::error::{RelaxError, Result};

/// Render one curve series.
pub fn render_ascii_plot(series: &CurveSeries, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let measured: Vec<(f64, f64)> = series
        .x
        .iter()
        .zip(&series.y)
        .filter_map(|(&x, y)| y.map(|y| (x, y)))
        .collect();
    let mut curve: Vec<(f64, f64)> = series.x.iter().copied().zip(series.back_calc.iter().copied()).collect();
    curve.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (x_min, x_max) = x_range(&series.x).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = y_range(&measured, &curve).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Draw curve first (so points can overlay).
    draw_curve(&mut grid, &curve, x_min, x_max, y_min, y_max);

    for &(x, y) in &measured {
        let col = map_x(x, x_min, x_max, width);
        let row = map_y(y, y_min, y_max, height);
        grid[row][col] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: {} {} | x=[{x_min:.3}, {x_max:.3}] | y=[{y_min:.2}, {y_max:.2}]\n",
        series.spin_id, series.label
    ));
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out
}

/// Fit of a results file to plot: the named model, or the selected one.
///
/// `spin` matches a unit name or any spin of a cluster. Without it the first
/// unit is used.
pub fn find_fit<'a>(results: &'a ResultsFile, spin: Option<&str>, model: Option<&str>) -> Result<&'a ModelFitRecord> {
    let unit = match spin {
        Some(id) => results
            .fits
            .iter()
            .find(|f| f.unit == id || f.spins.iter().any(|s| s == id))
            .map(|f| f.unit.as_str()),
        None => results.units().first().copied(),
    }
    .ok_or_else(|| RelaxError::Unknown {
        kind: "spin",
        name: spin.unwrap_or_default().to_string(),
    })?;

    let fit = match model {
        Some(m) => results
            .fits_for(unit)
            .into_iter()
            .find(|f| f.model.eq_ignore_ascii_case(m)),
        None => results.best_for(unit),
    };
    fit.ok_or_else(|| RelaxError::Unknown {
        kind: "model",
        name: format!("{} for '{unit}'", model.unwrap_or("fit")),
    })
}

/// Plot every series of a fit that belongs to `spin` (all when `None`).
pub fn render_fit(fit: &ModelFitRecord, spin: Option<&str>, width: usize, height: usize) -> String {
    let mut out = format!("{} ({}), chi2 = {:.4}\n", fit.unit, fit.model, fit.stats.chi2);
    let series = fit
        .curves
        .iter()
        .filter(|s| spin.is_none_or(|id| fit.unit == id || s.spin_id == id));
    for s in series {
        out.push_str(&render_ascii_plot(s, width, height));
    }
    out
}

fn x_range(xs: &[f64]) -> Option<(f64, f64)> {
    let min_x = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min_x.is_finite() && max_x.is_finite() && max_x > min_x {
        Some((min_x, max_x))
    } else {
        None
    }
}

fn y_range(measured: &[(f64, f64)], curve: &[(f64, f64)]) -> Option<(f64, f64)> {
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for &(_, y) in measured.iter().chain(curve) {
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }

    if min_y.is_finite() && max_y.is_finite() && max_y > min_y {
        Some((min_y, max_y))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], x_min: f64, x_max: f64, y_min: f64, y_max: f64) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(x, y) in curve.iter().filter(|(_, y)| y.is_finite()) {
        let col = map_x(x, x_min, x_max, width);
        let row = map_y(y, y_min, y_max, height);
        if let Some((c0, r0)) = prev {
            draw_line(grid, c0, r0, col, row, '-');
        } else {
            grid[row][col] = '-';
        }
        prev = Some((col, row));
    }
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnalysisKind, FitStats};

    fn series() -> CurveSeries {
        CurveSeries {
            spin_id: ":1@N".into(),
            label: "600.0 MHz".into(),
            x: vec![0.0, 4.5, 9.0],
            y: vec![Some(0.0), None, Some(10.0)],
            errors: vec![Some(0.1), None, Some(0.1)],
            back_calc: vec![0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn plot_golden_snapshot_small() {
        let txt = render_ascii_plot(&series(), 10, 5);
        let expected = concat!(
            "Plot: :1@N 600.0 MHz | x=[0.000, 9.000] | y=[-0.50, 10.50]\n",
            "         o\n",
            "          \n",
            "          \n",
            "          \n",
            "o---------\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn fits_found_by_cluster_member_and_model() {
        let record = |model: &str, selected: bool| ModelFitRecord {
            unit: "c1".into(),
            spins: vec![":1@N".into(), ":2@N".into()],
            model: model.into(),
            params: Vec::new(),
            stats: FitStats::default(),
            criterion: None,
            selected,
            curves: vec![series()],
        };
        let results = ResultsFile {
            tool: "relax".into(),
            created: chrono::Local::now(),
            analysis: AnalysisKind::Dispersion,
            x_label: "x".into(),
            y_label: "y".into(),
            selection_method: None,
            monte_carlo_sims: 0,
            fits: vec![record("No Rex", false), record("CR72", true)],
        };

        assert_eq!(find_fit(&results, Some(":2@N"), None).unwrap().model, "CR72");
        assert_eq!(find_fit(&results, None, Some("no rex")).unwrap().model, "No Rex");
        assert!(find_fit(&results, Some(":9@N"), None).is_err());
        assert!(find_fit(&results, None, Some("LM63")).is_err());

        let text = render_fit(find_fit(&results, None, None).unwrap(), Some(":1@N"), 10, 5);
        assert!(text.starts_with("c1 (CR72)"));
        assert_eq!(text.matches("Plot:").count(), 1);
    }
}
