//! Scoring tables over the detection tables of a finished sweep.
//!
//! ```text
//! sweep_report roc     --object-dir HD1160 --axis annuli --snr 3,4,5 --output roc.csv
//! sweep_report heatmap --object-dir HD1160 --metric mean-injected \
//!                      --first annuli --second movement --output mean.csv
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{info, warn};
use std::path::{Path, PathBuf};
use sweep::analysis::{
    injected_count, load_detection_tables, max_snr_table, mean_injected_snr_table, roc_table,
    target_snr_table, write_cell_table, write_roc_table, write_skipped_tables, SweepAxis,
};
use sweep::layout::DETECTIONS_DIR;

#[derive(Parser, Debug)]
#[command(
    name = "sweep_report",
    about = "Score a finished parameter sweep from its detection tables",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Metric {
    /// Mean SNR of the injected sources, misses counted as zero
    MeanInjected,
    /// Mean of each table's highest SNR
    Max,
    /// SNR of a known target, misses counted as zero
    Target,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// True and false positives per axis value and SNR threshold
    Roc {
        /// Object output directory of the sweep
        #[arg(long)]
        object_dir: PathBuf,

        /// Axis to group by
        #[arg(long)]
        axis: SweepAxis,

        /// SNR thresholds to evaluate
        #[arg(long, value_delimiter = ',', default_values_t = vec![3.0, 4.0, 5.0])]
        snr: Vec<f64>,

        #[arg(long)]
        output: PathBuf,
    },

    /// One score per cell of two axes
    Heatmap {
        /// Object output directory of the sweep
        #[arg(long)]
        object_dir: PathBuf,

        #[arg(long, value_enum)]
        metric: Metric,

        #[arg(long)]
        first: SweepAxis,

        #[arg(long)]
        second: SweepAxis,

        /// Target x offset from the star in pixels, for the target metric
        #[arg(long, allow_negative_numbers = true, requires = "target_y")]
        target_x: Option<f64>,

        /// Target y offset from the star in pixels, for the target metric
        #[arg(long, allow_negative_numbers = true, requires = "target_x")]
        target_y: Option<f64>,

        #[arg(long)]
        output: PathBuf,
    },
}

fn detections_dir(object_dir: &Path) -> PathBuf {
    object_dir.join(DETECTIONS_DIR)
}

fn skipped_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("{stem}_skipped.csv"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Roc {
            object_dir,
            axis,
            snr,
            output,
        } => {
            let tables = load_detection_tables(&detections_dir(&object_dir))?;
            info!("Loaded {} detection tables", tables.len());
            let rows = roc_table(&tables, axis, &snr);
            write_roc_table(&output, &rows)?;
            info!("Wrote {} rows to {}", rows.len(), output.display());
        }
        Command::Heatmap {
            object_dir,
            metric,
            first,
            second,
            target_x,
            target_y,
            output,
        } => {
            let tables = load_detection_tables(&detections_dir(&object_dir))?;
            info!("Loaded {} detection tables", tables.len());
            let table = match metric {
                Metric::MeanInjected => {
                    let injected = injected_count(&object_dir)?;
                    mean_injected_snr_table(&tables, first, second, injected)
                }
                Metric::Max => max_snr_table(&tables, first, second),
                Metric::Target => {
                    let (Some(x), Some(y)) = (target_x, target_y) else {
                        return Err("--target-x and --target-y are required for the target metric".into());
                    };
                    target_snr_table(&tables, first, second, [x, y])
                }
            };
            write_cell_table(&output, &table)?;
            info!("Wrote {} cells to {}", table.cells.len(), output.display());

            if !table.skipped.is_empty() {
                let path = skipped_path(&output);
                warn!(
                    "{} tables had no usable score; listed in {}",
                    table.skipped.len(),
                    path.display()
                );
                write_skipped_tables(&path, &table.skipped)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_sidecar_sits_next_to_output() {
        assert_eq!(
            skipped_path(Path::new("scores/mean.csv")),
            PathBuf::from("scores/mean_skipped.csv")
        );
    }

    #[test]
    fn test_cli_parses_target_metric() {
        let args = Args::try_parse_from([
            "sweep_report",
            "heatmap",
            "--object-dir",
            "out/HD1160",
            "--metric",
            "target",
            "--first",
            "annuli",
            "--second",
            "kl",
            "--target-x",
            "-12.5",
            "--target-y",
            "4",
            "--output",
            "target.csv",
        ])
        .unwrap();
        match args.command {
            Command::Heatmap {
                metric,
                second,
                target_x,
                target_y,
                ..
            } => {
                assert!(matches!(metric, Metric::Target));
                assert_eq!(second, SweepAxis::Numbasis);
                assert_eq!((target_x, target_y), (Some(-12.5), Some(4.0)));
            }
            Command::Roc { .. } => panic!("parsed the wrong subcommand"),
        }
    }
}
