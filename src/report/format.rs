//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized (important for snapshot tests)

use crate::domain::{ModelFitRecord, ParamValue, ResultsFile};
use crate::fit::SkippedFit;

use super::RunSummary;

/// Format the set-up summary printed before the fit tables.
pub fn format_setup_summary(summary: &RunSummary) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== relax - {} ===\n", summary.title));
    out.push_str(&format!(
        "Spins: {} selected of {}\n",
        summary.selected_spins, summary.total_spins
    ));
    out.push_str(&format!("Spectra: {}\n", summary.spectra));
    if summary.clusters > 0 {
        out.push_str(&format!("Clusters: {}\n", summary.clusters));
    }
    out.push_str(&format!("Models: {}\n", summary.models.join(", ")));
    if let Some(method) = summary.selection {
        out.push_str(&format!("Model selection: {}\n", method.display_name()));
    }
    match summary.monte_carlo_sims {
        0 => out.push_str("Errors: none (no Monte Carlo simulations)\n"),
        n => out.push_str(&format!("Errors: {n} Monte Carlo simulations\n")),
    }
    out
}

/// Parameters of the selected fit of every unit.
pub fn format_fit_table(results: &ResultsFile) -> String {
    let mut out = String::new();
    out.push_str("Fitted parameters:\n");
    push_row(
        &mut out,
        &format!(
            "{:<16} {:<16} {:<16} {:>14} {:>14} {:>12}",
            "spin", "model", "param", "value", "error", "chi2"
        ),
    );
    push_row(
        &mut out,
        &format!(
            "{:-<16} {:-<16} {:-<16} {:-<14} {:-<14} {:-<12}",
            "", "", "", "", "", ""
        ),
    );

    for unit in results.units() {
        let Some(fit) = results.best_for(unit) else {
            continue;
        };
        if fit.params.is_empty() {
            push_row(
                &mut out,
                &format!(
                    "{:<16} {:<16} {:<16} {:>14} {:>14} {:>12}",
                    truncate(unit, 16),
                    truncate(&fit.model, 16),
                    "-",
                    "",
                    "",
                    fmt_num(fit.stats.chi2)
                ),
            );
            continue;
        }
        for p in &fit.params {
            push_row(
                &mut out,
                &format!(
                    "{:<16} {:<16} {:<16} {:>14} {:>14} {:>12}",
                    truncate(p.spin_id.as_deref().unwrap_or(unit), 16),
                    truncate(&fit.model, 16),
                    truncate(&param_label(p), 16),
                    fmt_num(p.value),
                    p.error.map(fmt_num).unwrap_or_default(),
                    fmt_num(fit.stats.chi2)
                ),
            );
        }
    }
    out
}

/// Criterion values of every model, per unit. `*` marks the selected model.
pub fn format_selection_table(results: &ResultsFile) -> String {
    let mut out = String::new();
    let method = results
        .selection_method
        .map(|m| m.display_name())
        .unwrap_or("criterion");
    out.push_str("Model selection:\n");
    push_row(
        &mut out,
        &format!(
            "  {:<16} {:<16} {:>4} {:>4} {:>12} {:>12}",
            "spin", "model", "k", "n", "chi2", method
        ),
    );
    for unit in results.units() {
        for fit in results.fits_for(unit) {
            let chosen = if fit.selected { "*" } else { " " };
            push_row(
                &mut out,
                &format!(
                    "{chosen} {:<16} {:<16} {:>4} {:>4} {:>12} {:>12}",
                    truncate(unit, 16),
                    truncate(&fit.model, 16),
                    fit.stats.k,
                    fit.stats.n,
                    fmt_num(fit.stats.chi2),
                    fit.criterion.map(fmt_num).unwrap_or_default()
                ),
            );
        }
    }
    out
}

/// Fits that could not be optimised.
pub fn format_skipped(skipped: &[SkippedFit]) -> String {
    let mut out = String::new();
    for s in skipped {
        out.push_str(&format!("  (skipped {} for {}) {}\n", s.model, s.unit, s.reason));
    }
    out
}

/// How many parameter errors the Monte Carlo simulations produced.
pub fn format_mc_summary(results: &ResultsFile) -> String {
    let fits: Vec<&ModelFitRecord> = results.fits.iter().filter(|f| !f.params.is_empty()).collect();
    let total: usize = fits.iter().map(|f| f.params.len()).sum();
    let with_errors: usize = fits
        .iter()
        .map(|f| f.params.iter().filter(|p| p.error.is_some()).count())
        .sum();
    let mut out = format!(
        "Monte Carlo: {} simulations per fit, errors for {with_errors} of {total} parameters\n",
        results.monte_carlo_sims
    );
    let missing: Vec<String> = fits
        .iter()
        .filter(|f| f.params.iter().any(|p| p.error.is_none()))
        .map(|f| format!("{} ({})", f.unit, f.model))
        .collect();
    if !missing.is_empty() {
        out.push_str(&format!("  without errors: {}\n", missing.join(", ")));
    }
    out
}

fn param_label(p: &ParamValue) -> String {
    match p.field_mhz {
        Some(frq) => format!("{} ({frq:.0} MHz)", p.name),
        None => p.name.to_string(),
    }
}

fn push_row(out: &mut String, row: &str) {
    out.push_str(row.trim_end());
    out.push('\n');
}

/// Fixed notation for ordinary magnitudes, scientific otherwise.
fn fmt_num(v: f64) -> String {
    let a = v.abs();
    if v == 0.0 || (1e-3..1e5).contains(&a) {
        format!("{v:.4}")
    } else {
        format!("{v:.4e}")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
