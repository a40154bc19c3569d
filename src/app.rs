//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - runs the analysis of a set-up file
//! - prints reports/plots
//! - writes optional exports

use clap::Parser;
use tracing::{debug, info};

use crate::cli::{Cli, Command, FitArgs, PlotArgs, SequenceArgs, SimulateArgs, ViewArgs};
use crate::data::{SimulateConfig, parse_params, simulate_r2eff};
use crate::domain::{DispModel, ExpType, Isotope};
use crate::error::AppError;
use crate::io::{SequenceColumns, Setup, read_results_json, read_sequence};
use crate::mol::SpinSystem;

pub mod pipeline;

/// Entry point for the `relax` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    crate::logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| AppError::new(2, format!("Failed to configure {threads} worker threads: {e}")))?;
        debug!(threads, "Configured worker pool");
    }

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Plot(args) => handle_plot(args),
        Command::View(args) => handle_view(args),
        Command::Sequence(args) => handle_sequence(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let setup = Setup::load(&args.setup)?;
    let run = pipeline::run_fit(&setup, args.seed)?;
    let results = &run.results;

    println!("{}", crate::report::format_setup_summary(&run.summary));
    println!("{}", crate::report::format_fit_table(results));
    if results.selection_method.is_some() {
        println!("{}", crate::report::format_selection_table(results));
    }
    if results.monte_carlo_sims > 0 {
        println!("{}", crate::report::format_mc_summary(results));
    }
    if !run.skipped.is_empty() {
        println!("{}", crate::report::format_skipped(&run.skipped));
    }

    if args.plot {
        for unit in results.units() {
            if let Some(fit) = results.best_for(unit) {
                println!("{}", crate::plot::render_fit(fit, None, args.width, args.height));
            }
        }
    }

    // Optional exports.
    if let Some(path) = &args.export_json {
        crate::io::write_results_json(path, results)?;
        info!(file = %path.display(), "Wrote results");
    }
    if let Some(path) = &args.export_csv {
        crate::io::write_params_csv(path, results)?;
        info!(file = %path.display(), "Wrote parameter table");
    }
    if let Some(dir) = &args.grace_dir {
        let files = crate::io::write_grace_dir(dir, results)?;
        info!(dir = %dir.display(), files = files.len(), "Wrote Grace plots");
    }

    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let results = read_results_json(&args.results)?;
    let fit = crate::plot::find_fit(&results, args.spin.as_deref(), args.model.as_deref())?;
    let plot = crate::plot::render_fit(fit, args.spin.as_deref(), args.width, args.height);

    println!("{plot}");
    Ok(())
}

fn handle_view(args: ViewArgs) -> Result<(), AppError> {
    let results = read_results_json(&args.results)?;
    crate::tui::run(results)
}

fn handle_sequence(args: SequenceArgs) -> Result<(), AppError> {
    let columns = SequenceColumns {
        res_num_col: Some(args.res_num_col),
        res_name_col: Some(args.res_name_col),
        spin_name_col: args.spin_name_col,
        ..SequenceColumns::default()
    };
    let mut system = SpinSystem::new();
    read_sequence(&mut system, &args.file, &columns)?;
    if let Some(name) = &args.spin_name {
        system.name_spins(name, None)?;
    }

    let spins = system.spins(args.select.as_deref())?;
    for view in &spins {
        println!("{}", view.id());
    }
    println!("{} of {} spins", spins.len(), system.count_spins(None, false)?);
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let model: DispModel = args.model.parse()?;
    let exp_type = if args.r1rho {
        ExpType::R1rho
    } else {
        model.exp_type().unwrap_or(ExpType::Cpmg)
    };
    if !model.is_compatible(exp_type) {
        return Err(AppError::new(
            2,
            format!("The {model} model does not apply to {} data.", exp_type.display_name()),
        ));
    }
    let isotope: Isotope = args.isotope.parse()?;

    let config = SimulateConfig {
        model,
        exp_type,
        params: parse_params(&args.params)?,
        spin_id: args.spin_id.clone(),
        isotope,
        frq_mhz: args.field,
        points: args.points.clone(),
        relax_time: args.relax_time,
        offset_ppm: args.offset,
        r1: args.r1,
        noise: args.noise,
        seed: args.seed,
    };
    let points = simulate_r2eff(&config)?;

    let header = format!(
        "{model} {} data at {} MHz, {}, noise {} s^-1, seed {}",
        exp_type.display_name(),
        args.field,
        args.params,
        args.noise,
        args.seed
    );
    crate::io::write_r2eff(&args.output, &points, &header)?;
    info!(file = %args.output.display(), points = points.len(), "Wrote simulated rates");
    Ok(())
}
