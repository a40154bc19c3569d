//! Command-line parsing for the `relax` NMR relaxation analysis tool.
//!
//! Argument parsing and command dispatch stay separate from the analysis code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "relax", version, about = "NMR relaxation curve fitting and dispersion analysis")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Silence all logging.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write the log to this file.
    #[arg(long, env = "RELAX_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Worker threads for the parallel fits (default: all cores).
    #[arg(long, env = "RELAX_THREADS", global = true)]
    pub threads: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the analysis described by a TOML set-up file.
    Fit(FitArgs),
    /// Draw the curves of a results file in the terminal.
    Plot(PlotArgs),
    /// Browse a results file in the interactive viewer.
    View(ViewArgs),
    /// List the spins of a sequence file.
    Sequence(SequenceArgs),
    /// Write a synthetic R2eff file from a dispersion model.
    Simulate(SimulateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Experiment set-up file.
    #[arg(value_name = "SETUP")]
    pub setup: PathBuf,

    /// Seed for the Monte Carlo simulations (overrides the set-up file).
    #[arg(long, env = "RELAX_SEED")]
    pub seed: Option<u64>,

    /// Write the results to JSON.
    #[arg(long, value_name = "JSON")]
    pub export_json: Option<PathBuf>,

    /// Write the fitted parameters to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Write Grace plots into this directory.
    #[arg(long, value_name = "DIR")]
    pub grace_dir: Option<PathBuf>,

    /// Print an ASCII plot of every selected fit.
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 72)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

#[derive(Debug, Args)]
pub struct PlotArgs {
    /// Results JSON written by `relax fit --export-json`.
    #[arg(value_name = "JSON")]
    pub results: PathBuf,

    /// Spin ID or cluster name (default: the first unit).
    #[arg(long)]
    pub spin: Option<String>,

    /// Model to plot (default: the selected one).
    #[arg(long)]
    pub model: Option<String>,

    /// Plot width (columns).
    #[arg(long, default_value_t = 72)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

#[derive(Debug, Args)]
pub struct ViewArgs {
    /// Results JSON written by `relax fit --export-json`.
    #[arg(value_name = "JSON")]
    pub results: PathBuf,
}

#[derive(Debug, Args)]
pub struct SequenceArgs {
    /// Sequence file (residue number and name columns).
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Spin ID selection, such as `:2-10@N`.
    #[arg(long)]
    pub select: Option<String>,

    /// Residue number column (0-based).
    #[arg(long, default_value_t = 0)]
    pub res_num_col: usize,

    /// Residue name column (0-based).
    #[arg(long, default_value_t = 1)]
    pub res_name_col: usize,

    /// Spin name column (0-based).
    #[arg(long)]
    pub spin_name_col: Option<usize>,

    /// Name given to spins without one.
    #[arg(long)]
    pub spin_name: Option<String>,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Dispersion model, such as `CR72` or `"No Rex"`.
    #[arg(long)]
    pub model: String,

    /// Parameter values, such as `r2=10,dw=2,pA=0.9,kex=1500`.
    #[arg(long)]
    pub params: String,

    /// Spectrometer proton frequency, in MHz.
    #[arg(long)]
    pub field: f64,

    /// CPMG frequencies or spin-lock fields, in Hz.
    #[arg(long, value_delimiter = ',', required = true)]
    pub points: Vec<f64>,

    /// R1rho data instead of CPMG, for the models that apply to both.
    #[arg(long)]
    pub r1rho: bool,

    /// Constant relaxation time, in s.
    #[arg(long, default_value_t = 0.04)]
    pub relax_time: f64,

    /// Spin-lock offset from the resonance, in ppm.
    #[arg(long, default_value_t = 0.0)]
    pub offset: f64,

    /// R1 at this field, for the models that need it.
    #[arg(long)]
    pub r1: Option<f64>,

    /// Spin isotope.
    #[arg(long, default_value = "15N")]
    pub isotope: String,

    /// Spin ID written to the file.
    #[arg(long, default_value = ":1@N")]
    pub spin_id: String,

    /// Standard deviation of the noise, in s⁻¹.
    #[arg(long, default_value_t = 0.2)]
    pub noise: f64,

    /// Random seed.
    #[arg(long, env = "RELAX_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Output R2eff file.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["relax", "fit", "setup.toml", "-vv", "--threads", "2", "--plot"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.threads, Some(2));
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert!(args.plot);
        assert_eq!(args.setup, PathBuf::from("setup.toml"));
    }

    #[test]
    fn simulate_points_are_comma_separated() {
        let cli = Cli::parse_from([
            "relax", "simulate", "--model", "CR72", "--params", "r2=10", "--field", "600", "--points",
            "50,100,200", "-o", "out.txt",
        ]);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.points, vec![50.0, 100.0, 200.0]);
        assert_eq!(args.isotope, "15N");
    }
}
