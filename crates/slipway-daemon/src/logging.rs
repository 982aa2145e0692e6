//! Log output for the daemon.
//!
//! stdout is the event stream, so no layer here ever writes to it. In
//! production, JSON records go to a daily file under the log directory and a
//! compact copy goes to stderr for the journal. In development everything is
//! pretty-printed to stderr.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::env_vars;

/// File name prefix of the rolling log files.
const LOG_FILE_PREFIX: &str = "slipway.log";

/// Flush handles of the non-blocking writers, held until exit.
static GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Where and how logs are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Pretty stderr output with span events.
    Development,
    /// JSON files plus compact stderr output.
    Production,
}

impl LogMode {
    /// Mode selected by `SLIPWAY_ENV`; anything but `production` is development.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(env_vars::ENV).map_or(Self::Development, |value| Self::parse(&value))
    }

    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            Self::Production
        } else {
            Self::Development
        }
    }
}

/// Install the global subscriber for `mode`.
///
/// The filter comes from `RUST_LOG`, else `SLIPWAY_LOG_LEVEL`, else `info`.
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(mode: LogMode) -> anyhow::Result<()> {
    let level = std::env::var(env_vars::LOG_LEVEL).unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&level))?;

    match mode {
        LogMode::Development => {
            let stderr = fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);
            tracing_subscriber::registry().with(filter).with(stderr).init();
        }
        LogMode::Production => init_production(filter),
    }
    Ok(())
}

fn init_production(filter: EnvFilter) {
    let mut guards = Vec::with_capacity(2);

    let (stderr_writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(guard);
    let stderr = fmt::layer()
        .compact()
        .with_writer(stderr_writer)
        .with_ansi(false);

    let log_dir = log_directory();
    let (file, dir_error) = match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            let layer = fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), None)
        }
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
    let _ = GUARDS.set(guards);

    if let Some(e) = dir_error {
        warn!(
            path = %log_dir.display(),
            error = %e,
            "Cannot create log directory, logging to stderr only"
        );
    }
}

/// `SLIPWAY_LOG_DIR` if set, else the platform default.
fn log_directory() -> PathBuf {
    std::env::var_os(env_vars::LOG_DIR).map_or_else(default_log_directory, PathBuf::from)
}

fn default_log_directory() -> PathBuf {
    if cfg!(target_os = "linux") {
        return PathBuf::from("/var/log/slipway");
    }
    directories::ProjectDirs::from("", "", "slipway")
        .map_or_else(|| PathBuf::from("logs"), |dirs| dirs.data_dir().join("logs"))
}
