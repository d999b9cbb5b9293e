//! Tracing subscriber setup.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt, registry};

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Write daily-rotated log files here instead of the console.
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            file_prefix: "vmbuild.log".to_string(),
        }
    }
}

/// Install the global subscriber.
///
/// Returns the appender guard when logging to files; keep it alive for the
/// lifetime of the process or buffered lines are lost. Calling this twice is
/// harmless: the second subscriber is ignored.
pub fn init_logging(options: &LoggingOptions) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.level));

    match &options.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &options.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .try_init();
            Some(guard)
        }
        None => {
            let _ = registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init();
            None
        }
    }
}
