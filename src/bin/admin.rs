//! Operator commands for the histogram cache.
//!
//! ```bash
//! yfcc-admin rebuild                 # Recompute both histograms
//! yfcc-admin import detections.jsonl # Load detector output
//! yfcc-admin summary --min-conf 0.5  # Print counts at a threshold
//! ```

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use yfcc_boxes::histogram::fraction;
use yfcc_boxes::import::import_jsonl;
use yfcc_boxes::{logging, Config, Database, HistogramService};

enum Command {
    Rebuild,
    Import(PathBuf),
    Summary { min_conf: f64 },
}

struct AdminArgs {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Result<AdminArgs> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut command = None;
    let mut min_conf = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    bail!("--config requires a path argument");
                };
                config_path = Some(PathBuf::from(path));
                i += 1;
            }
            "--min-conf" | "-m" => {
                let Some(value) = args.get(i + 1) else {
                    bail!("--min-conf requires a number");
                };
                min_conf = Some(
                    value
                        .parse::<f64>()
                        .with_context(|| format!("--min-conf must be a number, got {:?}", value))?,
                );
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "rebuild" if command.is_none() => command = Some(Command::Rebuild),
            "summary" if command.is_none() => command = Some(Command::Summary { min_conf: 0.0 }),
            "import" if command.is_none() => {
                let Some(path) = args.get(i + 1) else {
                    bail!("import requires a file argument");
                };
                command = Some(Command::Import(PathBuf::from(path)));
                i += 1;
            }
            other => bail!("Unknown argument: {}", other),
        }
        i += 1;
    }

    let command = match command {
        Some(Command::Summary { .. }) => Command::Summary { min_conf: min_conf.unwrap_or(0.4) },
        Some(command) => command,
        None => {
            print_help();
            std::process::exit(1);
        }
    };

    Ok(AdminArgs { config_path, command })
}

fn print_help() {
    println!(
        r#"yfcc-admin - maintenance commands for yfcc-boxes

USAGE:
    yfcc-admin [OPTIONS] <COMMAND>

COMMANDS:
    rebuild             Recompute the confidence histograms from bb_table
    import FILE         Load JSON Lines detector output into the index
    summary             Print per-label counts at a threshold

OPTIONS:
    --config, -c PATH   Path to config file
    --min-conf, -m X    Threshold for summary (default: 0.4)
    --help, -h          Show this help message

ENVIRONMENT:
    YFCC_CONFIG         Path to config file (overrides default location)
    YFCC_DATABASE_URL   PostgreSQL connection string (selects the postgres backend)
    YFCC_LOG            Log level (trace, debug, info, warn, error)"#
    );
}

fn main() -> Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    logging::init(config.logging.dir.clone())?;

    let db = Database::open(&config.database).context("Failed to open database")?;
    db.initialize().context("Failed to initialize schema")?;
    let service = HistogramService::new(Arc::new(db), config.max_limit());

    match args.command {
        Command::Rebuild => {
            let report = service.rebuild()?;
            println!(
                "rebuilt {} label bins and {} image bins in {:.2}s (updated_at={})",
                report.counts.label_bins,
                report.counts.max_bins,
                report.elapsed.as_secs_f64(),
                report.updated_at
            );
        }
        Command::Import(path) => {
            let file = File::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            info!("Importing {}", path.display());
            let stats = import_jsonl(service.database(), BufReader::new(file))?;
            println!(
                "imported {} images with {} detections ({} with unknown labels)",
                stats.images, stats.detections, stats.unknown_labels
            );
            println!("run `yfcc-admin rebuild` to refresh the histograms");
        }
        Command::Summary { min_conf } => {
            let summary = service.threshold_summary(min_conf);
            let counts = &summary.label_counts;
            println!(
                "min_conf {:.2} (bin {}), histograms updated_at {}",
                summary.min_conf, summary.threshold_bin, counts.updated_at
            );
            println!(
                "images with a detection at or above: {} of {}",
                summary.images_at_or_above, summary.total_images
            );
            println!("boxes at or above: {}", counts.total_boxes);

            let mut rows: Vec<_> = counts.counts.iter().filter(|c| c.count > 0).collect();
            rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.label.cmp(b.label)));
            for row in rows {
                println!(
                    "  {:<16} {:>10}  {:>6.2}%",
                    row.label,
                    row.count,
                    fraction(row.count, counts.total_boxes) * 100.0
                );
            }
        }
    }

    Ok(())
}
