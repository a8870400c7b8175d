//! Run a full parameter sweep over one object.
//!
//! Loads the sweep configuration, injects the synthetic companions, reduces
//! every trial with the built-in classical ADI reducer and measures contrast
//! and detections. Each phase can be skipped to re-run the later phases on an
//! existing output tree.

use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use std::path::PathBuf;
use std::time::Instant;
use sweep::reduction::ClassicalAdi;
use sweep::{SweepConfig, TestDataset};

#[derive(Parser, Debug)]
#[command(
    name = "parameter_sweep",
    about = "Inject synthetic companions, reduce under every parameter combination and score the results",
    long_about = None
)]
struct Args {
    /// Sweep configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Override the output root from the configuration
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Do not inject synthetic companions
    #[arg(long)]
    skip_injection: bool,

    /// Do not run the reduction; measure existing reduced cubes
    #[arg(long)]
    skip_reduction: bool,

    /// Do not measure contrast or detect candidates
    #[arg(long)]
    skip_measurement: bool,
}

fn format_elapsed(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("Time elapsed: {hours} hours, {minutes} minutes, {secs} seconds")
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = SweepConfig::from_json_file(&args.config)?;
    if let Some(root) = args.output_root {
        config.output_root = root;
    }
    let phases = config.phases.clone();

    let mut dataset = TestDataset::new(&config)?;

    if args.skip_injection {
        info!("Skipping injection");
    } else {
        dataset.inject_fakes()?;
    }

    if args.skip_reduction {
        info!("Skipping reduction");
    } else {
        let summary = dataset.run_reduction(&ClassicalAdi, phases.run_on_fakes, phases.run_on_nofakes);
        info!(
            "Reduction: {} of {} runs succeeded",
            summary.succeeded(),
            summary.attempted
        );
    }

    if args.skip_measurement {
        info!("Skipping measurement");
    } else {
        let summary = dataset.measure_and_classify(&phases.calibrate, phases.detect_planets);
        info!(
            "Measurement: {} of {} artifacts succeeded",
            summary.succeeded(),
            summary.attempted
        );
    }

    let report = dataset.report();
    if !report.is_clean() {
        warn!(
            "{} failures and {} degenerate results; see {} and {}",
            report.failures().len(),
            report.degenerate().len(),
            dataset.context().layout.failures_path().display(),
            dataset.context().layout.degenerate_path().display()
        );
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let start = Instant::now();

    let result = run(args);
    info!("{}", format_elapsed(start.elapsed().as_secs()));
    result
}
