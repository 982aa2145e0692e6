//! Application state shared across the daemon's tasks.

use std::path::Path;
use std::sync::Arc;

use slipway_core::{
    build_engine, CalibrationTable, Config, DetectionEngine, StalenessMonitor, StaticBindings,
};
use tracing::info;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    engine: Arc<dyn DetectionEngine>,
}

impl AppState {
    /// Load configuration from `config_path` (or the platform default) and
    /// build the selected engine.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file is missing, unreadable or
    /// invalid.
    pub fn load(config_path: Option<&Path>) -> slipway_core::Result<Self> {
        let config = Config::load(config_path)?;
        Ok(Self::new(config))
    }

    /// Build the engine selected by `config`.
    ///
    /// Calibration problems are logged and replaced by an empty table.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let calibration = Arc::new(CalibrationTable::load_or_default(
            config.calibration.path.as_deref(),
            config.default_thresholds(),
        ));
        let bindings = Arc::new(StaticBindings::new(config.bindings.clone()));
        let engine = build_engine(&config, calibration.clone(), bindings);

        info!(
            engine = %engine.kind(),
            calibrated_scanners = calibration.len(),
            static_bindings = config.bindings.len(),
            "Detection engine ready"
        );

        Self {
            inner: Arc::new(AppStateInner { config, engine }),
        }
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The running detection engine.
    #[must_use]
    pub fn engine(&self) -> Arc<dyn DetectionEngine> {
        Arc::clone(&self.inner.engine)
    }

    /// Staleness monitor for engines that need one.
    #[must_use]
    pub fn staleness_monitor(&self) -> Option<StalenessMonitor> {
        self.inner
            .config
            .stale_after_secs()
            .map(|secs| StalenessMonitor::new(self.engine(), secs))
    }
}
