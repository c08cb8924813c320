use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use yfcc_boxes::api::{self, AppState};
use yfcc_boxes::{logging, Config, Database, HistogramService};

struct Args {
    config_path: Option<PathBuf>,
    bind: Option<String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args { config_path: None, bind: None };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("yfcc-boxes {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.bind = Some(args[i + 1].clone());
                    i += 1;
                } else {
                    eprintln!("Error: --bind requires an address argument");
                    std::process::exit(1);
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"yfcc-boxes - confidence histogram API for YFCC object detections

USAGE:
    yfcc-boxes [OPTIONS]

OPTIONS:
    --config, -c PATH   Path to config file
    --bind, -b ADDR     Listen address (overrides [server].bind)
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    YFCC_CONFIG         Path to config file (overrides default location)
    YFCC_DATABASE_URL   PostgreSQL connection string (selects the postgres backend)
    YFCC_LOG            Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/yfcc-boxes/config.toml

See also: yfcc-admin --help"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    let config = match args.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    logging::init(config.logging.dir.clone())?;

    let db = Database::open(&config.database).context("Failed to open database")?;
    db.initialize().context("Failed to initialize schema")?;
    info!("Using {} backend", db.backend_name());

    let service = HistogramService::new(Arc::new(db), config.max_limit());
    let state = Arc::new(AppState::new(service, &config.server));

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    api::serve(&bind, state).await
}
