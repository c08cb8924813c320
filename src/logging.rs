//! Logging setup with journald support on Linux.
//!
//! Under systemd the server logs to the journal. Elsewhere it writes daily
//! rolling files when a log directory is configured, and stderr otherwise.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the global subscriber.
///
/// Log level is read from `YFCC_LOG` (`debug`, `info`, `warn`, `error`, or
/// any `EnvFilter` directive), defaulting to `info`.
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("YFCC_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        // Only use the journal when actually running under systemd
        if std::env::var_os("JOURNAL_STREAM").is_some() {
            if let Ok(journald_layer) = tracing_journald::layer() {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(journald_layer)
                    .try_init()?;

                tracing::info!("Logging initialized with journald backend");
                return Ok(());
            }
        }
    }

    if let Some(log_dir) = log_dir {
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = tracing_appender::rolling::daily(&log_dir, "yfcc-boxes.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = GUARD.set(guard);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .try_init()?;

        tracing::info!("Logging initialized with file backend at {:?}", log_dir);
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
