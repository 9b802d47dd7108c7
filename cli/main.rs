#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use spower::config::ExperimentFile;
use spower::render::CsvExport;
use spower::{GraphLasso, GraphLassoEbic, StatisticalPower};

#[derive(Parser)]
#[command(
    name = "spower",
    version,
    about = "Measure the statistical power of exact support recovery for sparse precision-matrix estimators"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a power sweep over sparsity levels and sample ratios
    Run(RunArgs),
    /// Print version information
    Version,
}

#[derive(Args)]
struct RunArgs {
    /// TOML experiment file; flags below override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of features of every synthesized graph
    #[arg(long, value_name = "N")]
    features: Option<usize>,

    /// Trials per (sparsity, ratio) cell
    #[arg(long, value_name = "N")]
    trials: Option<usize>,

    /// Number of n_samples / n_features grid points
    #[arg(long, value_name = "N")]
    grid_points: Option<usize>,

    /// Seed of the experiment's random streams
    #[arg(long)]
    seed: Option<u64>,

    /// Write the power surface as CSV
    #[arg(long, value_name = "PATH")]
    csv: Option<PathBuf>,

    /// Run trials on a single thread
    #[arg(long)]
    sequential: bool,

    /// Skip the text chart
    #[arg(long)]
    quiet: bool,

    /// Print progress while the sweep runs
    #[arg(long, short)]
    verbose: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::Version) => {
            println!("spower {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => {
            let mut cmd = Cli::command();
            cmd.print_help().map_err(Into::into)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_experiment(args: &RunArgs) -> Result<ExperimentFile, Box<dyn std::error::Error>> {
    let mut file = match &args.config {
        Some(path) => {
            eprintln!("> Loading experiment file: {}", path.display());
            ExperimentFile::load(path)?
        }
        None => ExperimentFile::default(),
    };

    let experiment = &mut file.experiment;
    if let Some(n) = args.features {
        experiment.n_features = n;
    }
    if let Some(n) = args.trials {
        experiment.n_trials = n;
    }
    if let Some(n) = args.grid_points {
        experiment.n_grid_points = n;
    }
    if let Some(seed) = args.seed {
        experiment.seed = seed;
    }
    if args.sequential {
        experiment.parallel = false;
    }
    if args.verbose {
        experiment.verbose = true;
    }
    if args.csv.is_some() {
        file.output.csv = args.csv.clone();
    }
    if args.quiet {
        file.output.quiet = true;
    }
    Ok(file)
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let file = load_experiment(&args)?;

    let base = StatisticalPower::new(GraphLassoEbic::new(file.selector.clone()))
        .with_config(file.experiment.clone())
        .with_graph_source(file.graph);
    let mut controller = match &file.trial {
        Some(trial) => base.with_trial_estimator(GraphLasso::new(trial.clone())),
        None => base,
    };

    let results = controller.fit()?;
    eprintln!(
        "> Power sweep finished in {:.2?} ({} cells)",
        start.elapsed(),
        results.power.len()
    );

    if let Some(path) = &file.output.csv {
        let mut export = CsvExport::create(path)?;
        controller.show_with(&mut export)?;
        eprintln!("> Wrote power surface to {}", path.display());
    }
    if !file.output.quiet {
        controller.show()?;
    }
    Ok(())
}
