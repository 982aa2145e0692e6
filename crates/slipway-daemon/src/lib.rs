//! # slipway-daemon
//!
//! Wiring around `slipway-core`: reads decoded BLE detections as JSON lines,
//! feeds them through the configured engine and writes state-change events
//! as JSON lines.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod ingest;
pub mod logging;
pub mod output;
pub mod state;
pub mod tasks;

/// Environment variable names
pub mod env_vars {
    /// Path of the TOML configuration file.
    pub const CONFIG: &str = "SLIPWAY_CONFIG";
    /// `production` enables file logging.
    pub const ENV: &str = "SLIPWAY_ENV";
    /// Log filter used when `RUST_LOG` is unset.
    pub const LOG_LEVEL: &str = "SLIPWAY_LOG_LEVEL";
    /// Directory of the production log files.
    pub const LOG_DIR: &str = "SLIPWAY_LOG_DIR";
}

/// Default runtime values
pub mod defaults {
    /// How often the staleness monitor runs, in seconds.
    pub const STALENESS_TICK_SECS: u64 = 1;
    /// Fallback sweep interval when the configured one is unusable, in seconds.
    pub const SWEEP_INTERVAL_SECS: u64 = 300;
    /// Events buffered between the engine and the output writer.
    pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
}
