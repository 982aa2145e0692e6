//! Per-scanner RSSI bias and threshold calibration.
//!
//! Physically identical scanners report systematically different RSSI
//! depending on antenna orientation and hardware. The calibration table
//! removes that bias before any conditioning:
//!
//! ```text
//! corrected_rssi = raw_rssi - offset_for(scanner_id)
//! ```
//!
//! The table is loaded once from a JSON mapping keyed by scanner id:
//!
//! ```json
//! {
//!   "dock-outer": { "rssi_offset_db": 4.5, "thresholds": { "active_dbm": -68, "energy_dbm": -74 } },
//!   "dock-inner": { "rssi_offset_db": -2.0 }
//! }
//! ```
//!
//! A missing file, missing key or missing threshold is never fatal: the
//! engine-wide defaults apply and a warning is logged once per scanner id.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::SlipwayError;

/// Errors raised while reading a calibration source.
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// The calibration file could not be read.
    #[error("Failed to read calibration file {}: {source}", path.display())]
    ReadError {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The calibration file is not a valid mapping.
    #[error("Failed to parse calibration data: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Result type for calibration loading.
pub type CalibrationResult<T> = std::result::Result<T, CalibrationError>;

/// Detection thresholds that apply to one scanner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScannerThresholds {
    /// Level at or above which a corrected sample counts as strong.
    pub active_dbm: f64,

    /// Level used for stable-crossing (energy) detection.
    pub energy_dbm: f64,
}

impl Default for ScannerThresholds {
    fn default() -> Self {
        Self {
            active_dbm: -70.0,
            energy_dbm: -75.0,
        }
    }
}

/// Partial threshold override as found in the calibration source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverride {
    /// Overrides [`ScannerThresholds::active_dbm`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_dbm: Option<f64>,

    /// Overrides [`ScannerThresholds::energy_dbm`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_dbm: Option<f64>,
}

/// Calibration record for a single scanner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    /// Signed bias subtracted from every raw reading of this scanner.
    #[serde(default)]
    pub rssi_offset_db: f64,

    /// Optional per-scanner thresholds.
    #[serde(default)]
    pub thresholds: ThresholdOverride,
}

/// Immutable scanner → calibration lookup.
#[derive(Debug, Default)]
pub struct CalibrationTable {
    entries: HashMap<String, CalibrationEntry>,
    defaults: ScannerThresholds,
    warned: RwLock<HashSet<String>>,
}

impl CalibrationTable {
    /// Build a table from already-parsed entries.
    #[must_use]
    pub fn new(entries: HashMap<String, CalibrationEntry>, defaults: ScannerThresholds) -> Self {
        Self {
            entries,
            defaults,
            warned: RwLock::new(HashSet::new()),
        }
    }

    /// An empty table: zero offsets and engine defaults for every scanner.
    #[must_use]
    pub fn empty(defaults: ScannerThresholds) -> Self {
        Self::new(HashMap::new(), defaults)
    }

    /// Parse a JSON calibration mapping.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::ParseError`] if the document is not a
    /// mapping of scanner ids to calibration entries.
    pub fn from_json_str(json: &str, defaults: ScannerThresholds) -> CalibrationResult<Self> {
        let entries: HashMap<String, CalibrationEntry> = serde_json::from_str(json)?;
        Ok(Self::new(entries, defaults))
    }

    /// Load a calibration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path, defaults: ScannerThresholds) -> CalibrationResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CalibrationError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content, defaults)
    }

    /// Load a calibration file, falling back to an empty table on any
    /// failure. A missing path is not worth a warning; an unreadable or
    /// malformed file is.
    #[must_use]
    pub fn load_or_default(path: Option<&Path>, defaults: ScannerThresholds) -> Self {
        let Some(path) = path else {
            debug!("No calibration source configured, using zero offsets");
            return Self::empty(defaults);
        };

        if !path.exists() {
            debug!(path = %path.display(), "Calibration file absent, using zero offsets");
            return Self::empty(defaults);
        }

        match Self::load(path, defaults) {
            Ok(table) => {
                debug!(path = %path.display(), scanners = table.len(), "Loaded calibration table");
                table
            }
            Err(e) => {
                let err = SlipwayError::from(e);
                warn!(
                    code = err.error_code(),
                    error = %err,
                    "Ignoring unusable calibration source, using zero offsets"
                );
                Self::empty(defaults)
            }
        }
    }

    /// Offset in dB for a scanner (zero when not calibrated).
    #[must_use]
    pub fn offset_for(&self, scanner_id: &str) -> f64 {
        self.lookup(scanner_id).map_or(0.0, |e| e.rssi_offset_db)
    }

    /// Effective thresholds for a scanner, per-field falling back to the
    /// engine defaults.
    #[must_use]
    pub fn thresholds_for(&self, scanner_id: &str) -> ScannerThresholds {
        self.lookup(scanner_id).map_or(self.defaults, |e| ScannerThresholds {
            active_dbm: e.thresholds.active_dbm.unwrap_or(self.defaults.active_dbm),
            energy_dbm: e.thresholds.energy_dbm.unwrap_or(self.defaults.energy_dbm),
        })
    }

    /// Apply the scanner's offset to a raw reading.
    #[must_use]
    pub fn correct(&self, scanner_id: &str, raw_rssi: i32) -> f64 {
        f64::from(raw_rssi) - self.offset_for(scanner_id)
    }

    /// Engine-wide default thresholds.
    #[must_use]
    pub const fn defaults(&self) -> ScannerThresholds {
        self.defaults
    }

    /// Number of calibrated scanners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no scanner is calibrated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, scanner_id: &str) -> Option<&CalibrationEntry> {
        let entry = self.entries.get(scanner_id);
        if entry.is_none() && !self.entries.is_empty() {
            self.warn_once(scanner_id);
        }
        entry
    }

    fn warn_once(&self, scanner_id: &str) {
        // The write lock is only taken the first time a scanner is missed.
        if self
            .warned
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(scanner_id)
        {
            return;
        }
        let mut warned = self.warned.write().unwrap_or_else(PoisonError::into_inner);
        if warned.insert(scanner_id.to_string()) {
            warn!(scanner_id, "No calibration entry for scanner, using zero offset and default thresholds");
        }
    }
}
