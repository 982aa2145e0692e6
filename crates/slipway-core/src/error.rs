//! Unified error types for the slipway core library.
//!
//! Each fallible module has its own error type ([`ConfigError`],
//! [`CalibrationError`]); [`SlipwayError`] folds them into one enum for
//! callers that only need to report or classify a failure.
//!
//! Sample processing itself never fails: input the engine cannot use is
//! dropped and logged. Errors only arise while loading configuration and
//! calibration data, or at the daemon's I/O boundary.
//!
//! # Example
//!
//! ```rust
//! use slipway_core::error::{Result, SlipwayError};
//! use std::path::Path;
//!
//! fn require_config(path: &Path) -> Result<()> {
//!     if !path.exists() {
//!         return Err(SlipwayError::ConfigNotFound(path.to_path_buf()));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`ConfigError`]: crate::config::ConfigError
//! [`CalibrationError`]: crate::calibration::CalibrationError

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all slipway operations.
#[derive(Debug, Error)]
pub enum SlipwayError {
    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration could not be read or parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // CALIBRATION ERRORS
    // =========================================================================
    /// The calibration file could not be read.
    #[error("Calibration file unreadable: {0}")]
    CalibrationUnreadable(String),

    /// The calibration file is not a valid scanner mapping.
    #[error("Invalid calibration data: {0}. Expected a JSON object keyed by scanner id.")]
    CalibrationParseError(String),

    // =========================================================================
    // INPUT ERRORS
    // =========================================================================
    /// An ingested detection record could not be decoded.
    #[error("Malformed detection record: {0}")]
    MalformedDetection(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for slipway operations.
pub type Result<T> = std::result::Result<T, SlipwayError>;

impl SlipwayError {
    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to calibration data.
    #[inline]
    #[must_use]
    pub const fn is_calibration_error(&self) -> bool {
        matches!(
            self,
            Self::CalibrationUnreadable(_) | Self::CalibrationParseError(_)
        )
    }

    /// Returns `true` if this error is an I/O failure.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::IoError(_))
    }

    /// Returns `true` if processing can continue past this error.
    ///
    /// A bad input line or a missing calibration table degrades service but
    /// does not stop the engine.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedDetection(_)
                | Self::CalibrationUnreadable(_)
                | Self::CalibrationParseError(_)
        )
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::CalibrationUnreadable(_) => "CALIBRATION_UNREADABLE",
            Self::CalibrationParseError(_) => "CALIBRATION_PARSE_ERROR",
            Self::MalformedDetection(_) => "MALFORMED_DETECTION",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for SlipwayError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::NoConfigDir => {
                Self::ConfigParseError("cannot determine configuration directory".into())
            }
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::calibration::CalibrationError> for SlipwayError {
    fn from(err: crate::calibration::CalibrationError) -> Self {
        use crate::calibration::CalibrationError;
        match err {
            CalibrationError::ReadError { path, source } => {
                Self::CalibrationUnreadable(format!("{}: {source}", path.display()))
            }
            CalibrationError::ParseError(e) => Self::CalibrationParseError(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for SlipwayError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedDetection(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationError;
    use crate::config::ConfigError;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_config_error_classification() {
        assert!(SlipwayError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(SlipwayError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(SlipwayError::ConfigValidationError("invalid value".into()).is_config_error());

        assert!(!SlipwayError::CalibrationParseError("x".into()).is_config_error());
    }

    #[test]
    fn test_calibration_error_classification() {
        assert!(SlipwayError::CalibrationUnreadable("gone".into()).is_calibration_error());
        assert!(SlipwayError::CalibrationParseError("bad".into()).is_calibration_error());
        assert!(!SlipwayError::ConfigNotFound(PathBuf::new()).is_calibration_error());
    }

    #[test]
    fn test_io_error_classification() {
        assert!(SlipwayError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());
        assert!(!SlipwayError::MalformedDetection("x".into()).is_io_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(SlipwayError::MalformedDetection("eof".into()).is_recoverable());
        assert!(SlipwayError::CalibrationUnreadable("gone".into()).is_recoverable());
        assert!(!SlipwayError::ConfigValidationError("bad".into()).is_recoverable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SlipwayError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
        assert_eq!(
            SlipwayError::CalibrationParseError("x".into()).error_code(),
            "CALIBRATION_PARSE_ERROR"
        );
        assert_eq!(
            SlipwayError::MalformedDetection("x".into()).error_code(),
            "MALFORMED_DETECTION"
        );
    }

    #[test]
    fn test_from_config_error() {
        let err: SlipwayError = ConfigError::NotFound(PathBuf::from("/etc/slipway.toml")).into();
        assert!(matches!(err, SlipwayError::ConfigNotFound(_)));

        let err: SlipwayError = ConfigError::MultipleValidationErrors(vec![
            ConfigError::ValidationError {
                field: "store.shards".into(),
                message: "must be at least 1".into(),
            },
            ConfigError::ValidationError {
                field: "conditioning.alpha".into(),
                message: "must be in (0, 1]".into(),
            },
        ])
        .into();
        let message = err.to_string();
        assert!(message.contains("store.shards"));
        assert!(message.contains("conditioning.alpha"));
    }

    #[test]
    fn test_from_calibration_error() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SlipwayError = CalibrationError::ParseError(parse).into();
        assert!(err.is_calibration_error());
        assert_eq!(err.error_code(), "CALIBRATION_PARSE_ERROR");
    }

    #[test]
    fn test_from_io_error() {
        let err: SlipwayError = IoErr::new(ErrorKind::BrokenPipe, "closed").into();
        assert!(err.is_io_error());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SlipwayError>();
        assert_sync::<SlipwayError>();
    }
}
