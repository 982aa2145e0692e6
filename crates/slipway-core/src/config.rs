//! Configuration management.
//!
//! Configuration is layered in this order, later layers winning:
//!
//! 1. Built-in defaults (every section is `#[serde(default)]`)
//! 2. An optional TOML file (`/etc/slipway/config.toml` on Linux)
//! 3. Environment overrides with prefix `SLIPWAY` and separator `__`,
//!    e.g. `SLIPWAY__ENGINE__KIND=single_gate`
//!
//! ```toml
//! [engine]
//! kind = "dual_gate"
//!
//! [engine.dual_gate]
//! confirm_k = 3
//!
//! [scanners.bindings]
//! "dock-a" = "outer"
//! "dock-b" = "inner"
//!
//! [calibration]
//! path = "/etc/slipway/calibration.json"
//!
//! [bindings."ac:23:3f:a0:11:02"]
//! entity_id = "boat-17"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::calibration::ScannerThresholds;
use crate::engine::{
    DualGateConfig, EngineKind, EntityBinding, LagClassifierConfig, SingleGateConfig,
};
use crate::signal::ConditioningConfig;
use crate::store::StoreConfig;
use crate::types::Side;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SLIPWAY";

/// Separator between nested keys in environment overrides.
pub const ENV_SEPARATOR: &str = "__";

// ============================================================================
// Error Types
// ============================================================================

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// No platform configuration directory could be determined.
    #[error("Cannot determine configuration directory")]
    NoConfigDir,

    /// A configuration source could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// Failed to parse TOML.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation failed.
    #[error("Validation error: {field} - {message}")]
    ValidationError {
        /// Field that failed validation.
        field: String,
        /// Description of the problem.
        message: String,
    },

    /// Multiple validation errors.
    #[error("Multiple validation errors: {}", format_errors(.0))]
    MultipleValidationErrors(Vec<ConfigError>),
}

fn format_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Configuration Sections
// ============================================================================

/// Engine selection and per-engine tuning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Which engine processes detections.
    pub kind: EngineKind,

    /// Dual-gate tuning.
    pub dual_gate: DualGateConfig,

    /// Lag-classifier tuning.
    pub lag_classifier: LagClassifierConfig,

    /// Single-gate tuning.
    pub single_gate: SingleGateConfig,
}

/// Scanner placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannersConfig {
    /// Explicit scanner id → side bindings. Scanners not listed here fall
    /// back to suffix matching (`-outer`, `-left`, ...).
    pub bindings: HashMap<String, Side>,
}

/// Calibration source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// JSON calibration table. Without it every scanner uses zero offset
    /// and the engine defaults.
    pub path: Option<PathBuf>,
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine selection and tuning.
    pub engine: EngineSection,

    /// Signal conditioning shared by every series.
    pub conditioning: ConditioningConfig,

    /// Scanner placement.
    pub scanners: ScannersConfig,

    /// Calibration source.
    pub calibration: CalibrationConfig,

    /// Presence store tuning.
    pub store: StoreConfig,

    /// Static beacon → entity bindings.
    pub bindings: HashMap<String, EntityBinding>,
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// An explicit `path` must exist. Without one the platform default path
    /// is used if present.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or parsed, or if the
    /// merged configuration fails validation.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let file = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().ok().filter(|p| p.exists()),
        };

        let mut builder = ::config::Config::builder();
        if let Some(file) = &file {
            debug!(path = %file.display(), "Loading configuration file");
            builder = builder.add_source(
                ::config::File::from(file.as_path())
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or fails validation.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default thresholds of the selected engine, used for scanners
    /// without calibrated thresholds.
    #[must_use]
    pub fn default_thresholds(&self) -> ScannerThresholds {
        match self.engine.kind {
            EngineKind::DualGate => self.engine.dual_gate.default_thresholds(),
            EngineKind::LagClassifier => self.engine.lag_classifier.default_thresholds(),
            EngineKind::SingleGate => ScannerThresholds::default(),
        }
    }

    /// Staleness threshold used by the staleness monitor, if the selected
    /// engine relies on one.
    #[must_use]
    pub const fn stale_after_secs(&self) -> Option<f64> {
        match self.engine.kind {
            EngineKind::SingleGate => Some(self.engine.single_gate.stale_after_secs),
            EngineKind::DualGate | EngineKind::LagClassifier => None,
        }
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check every value, collecting all violations.
    ///
    /// # Errors
    ///
    /// Returns `MultipleValidationErrors` listing every invalid field.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        let c = &self.conditioning;
        if !(c.alpha > 0.0 && c.alpha <= 1.0) {
            errors.push(invalid("conditioning.alpha", "must be in (0, 1]"));
        }
        if c.capacity < 2 {
            errors.push(invalid("conditioning.capacity", "must be at least 2"));
        }

        let d = &self.engine.dual_gate;
        if d.confirm_k == 0 {
            errors.push(invalid("engine.dual_gate.confirm_k", "must be at least 1"));
        }
        if d.hysteresis_db < 0.0 {
            errors.push(invalid("engine.dual_gate.hysteresis_db", "must not be negative"));
        }
        positive(&mut errors, "engine.dual_gate.confirm_window_secs", d.confirm_window_secs);
        positive(&mut errors, "engine.dual_gate.absence_timeout_secs", d.absence_timeout_secs);
        positive(&mut errors, "engine.dual_gate.state_timeout_secs", d.state_timeout_secs);
        positive(&mut errors, "engine.dual_gate.stuck_timeout_secs", d.stuck_timeout_secs);
        positive(&mut errors, "engine.dual_gate.slope_window_secs", d.slope_window_secs);

        let l = &self.engine.lag_classifier;
        positive(&mut errors, "engine.lag_classifier.arming_window_secs", l.arming_window_secs);
        positive(
            &mut errors,
            "engine.lag_classifier.decision_timeout_secs",
            l.decision_timeout_secs,
        );
        positive(&mut errors, "engine.lag_classifier.cooldown_secs", l.cooldown_secs);
        positive(&mut errors, "engine.lag_classifier.stale_reset_secs", l.stale_reset_secs);
        positive(&mut errors, "engine.lag_classifier.max_lag_secs", l.max_lag_secs);
        if l.dwell_secs < 0.0 {
            errors.push(invalid("engine.lag_classifier.dwell_secs", "must not be negative"));
        }
        if l.min_margin_db < 0.0 {
            errors.push(invalid("engine.lag_classifier.min_margin_db", "must not be negative"));
        }
        if l.min_samples_per_side == 0 {
            errors.push(invalid("engine.lag_classifier.min_samples_per_side", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&l.confidence) {
            errors.push(invalid("engine.lag_classifier.confidence", "must be in [0, 1]"));
        }

        positive(
            &mut errors,
            "engine.single_gate.stale_after_secs",
            self.engine.single_gate.stale_after_secs,
        );

        if self.store.shards == 0 {
            errors.push(invalid("store.shards", "must be at least 1"));
        }
        positive(&mut errors, "store.retention_secs", self.store.retention_secs);
        positive(&mut errors, "store.sweep_interval_secs", self.store.sweep_interval_secs);
        if self.engine.kind == EngineKind::LagClassifier
            && self.store.retention_secs <= l.longest_timer_secs()
        {
            errors.push(invalid(
                "store.retention_secs",
                "must exceed every lag-classifier timer",
            ));
        }

        let allowed = self.engine.kind.sides();
        let mut scanners: Vec<_> = self.scanners.bindings.iter().collect();
        scanners.sort();
        for (scanner_id, side) in scanners {
            if !allowed.contains(side) {
                errors.push(invalid(
                    &format!("scanners.bindings.{scanner_id}"),
                    &format!("side '{side}' is not used by the {} engine", self.engine.kind),
                ));
            }
        }

        for (beacon_id, binding) in &self.bindings {
            if binding.entity_id.trim().is_empty() {
                errors.push(invalid(
                    &format!("bindings.{beacon_id}.entity_id"),
                    "cannot be empty",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MultipleValidationErrors(errors))
        }
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn positive(errors: &mut Vec<ConfigError>, field: &str, value: f64) {
    if !(value > 0.0 && value.is_finite()) {
        errors.push(invalid(field, "must be a positive number of seconds"));
    }
}

/// Platform configuration file path.
///
/// # Errors
///
/// Returns `NoConfigDir` if the platform has no configuration directory.
pub fn default_config_path() -> ConfigResult<PathBuf> {
    // On the gateway: /etc/slipway/config.toml
    // For development: the per-user config directory
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/etc/slipway/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs =
            directories::ProjectDirs::from("", "", "slipway").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

// ============================================================================
// Tests
// ============================================================================
