//! Unified error types for the blemock core library.
//!
//! [`BleMockError`] covers every failure mode of the scan, simulate and
//! broadcast loops. The loops treat most variants as per-cycle warnings; only
//! [`BleMockError::PrerequisiteMissing`] is meant to abort a binary before it
//! enters its loop.
//!
//! # Example
//!
//! ```rust
//! use blemock_core::error::{BleMockError, Result};
//! use std::path::Path;
//!
//! fn require_registry(path: &Path) -> Result<()> {
//!     if !path.exists() {
//!         return Err(BleMockError::PrerequisiteMissing(format!(
//!             "registry file {} not found",
//!             path.display()
//!         )));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::advertiser::AdvertiserState;

/// The unified error type for all blemock operations.
#[derive(Debug, Error)]
pub enum BleMockError {
    // =========================================================================
    // LOOP ERRORS
    // =========================================================================
    /// A sighting could not be merged into the registry.
    #[error("Invalid sighting: {0}")]
    InvalidSighting(String),

    /// The discovery collaborator errored or timed out.
    #[error("Device discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Pushing scan results to the consumer failed.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// A required external tool or file is absent.
    #[error("Missing prerequisite: {0}")]
    PrerequisiteMissing(String),

    // =========================================================================
    // ADVERTISING ERRORS
    // =========================================================================
    /// The advertiser was asked to move between incompatible states.
    #[error("Cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        /// State the advertiser was in.
        from: AdvertiserState,
        /// State that was requested.
        to: AdvertiserState,
    },

    /// The platform refused to start advertising.
    #[error("Advertising failed: {0}")]
    AdvertisingFailed(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration sources could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// The registry file could not be written.
    #[error("Failed to persist {}: {message}", .path.display())]
    Persistence {
        /// File being written.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// JSON or TOML (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for blemock operations.
pub type Result<T> = std::result::Result<T, BleMockError>;

impl BleMockError {
    /// Returns `true` if the loop should log this error and carry on with the
    /// next cycle.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidSighting(_)
                | Self::DiscoveryFailed(_)
                | Self::DeliveryFailed(_)
                | Self::Persistence { .. }
        )
    }

    /// Returns `true` if the process should stop before entering its loop.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PrerequisiteMissing(_) | Self::ConfigLoad(_) | Self::ConfigValidation(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad(_) | Self::ConfigValidation(_))
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidSighting(_) => "INVALID_SIGHTING",
            Self::DiscoveryFailed(_) => "DISCOVERY_FAILED",
            Self::DeliveryFailed(_) => "DELIVERY_FAILED",
            Self::PrerequisiteMissing(_) => "PREREQUISITE_MISSING",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AdvertisingFailed(_) => "ADVERTISING_FAILED",
            Self::ConfigLoad(_) => "CONFIG_LOAD",
            Self::ConfigValidation(_) => "CONFIG_VALIDATION",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM LIBRARY ERRORS
// =============================================================================

impl From<serde_json::Error> for BleMockError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for BleMockError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for BleMockError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigLoad(err.to_string())
    }
}

#[cfg(feature = "bluetooth")]
impl From<bluer::Error> for BleMockError {
    fn from(err: bluer::Error) -> Self {
        Self::DiscoveryFailed(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_loop_errors_are_recoverable() {
        assert!(BleMockError::InvalidSighting("empty address".into()).is_recoverable());
        assert!(BleMockError::DiscoveryFailed("timeout".into()).is_recoverable());
        assert!(BleMockError::DeliveryFailed("adb push".into()).is_recoverable());

        assert!(!BleMockError::PrerequisiteMissing("adb".into()).is_recoverable());
    }

    #[test]
    fn test_prerequisite_is_fatal() {
        assert!(BleMockError::PrerequisiteMissing("adb".into()).is_fatal());
        assert!(BleMockError::ConfigValidation("band".into()).is_fatal());
        assert!(!BleMockError::DeliveryFailed("adb push".into()).is_fatal());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(BleMockError::ConfigLoad("syntax".into()).is_config_error());
        assert!(BleMockError::ConfigValidation("band".into()).is_config_error());
        assert!(!BleMockError::Serialization("json".into()).is_config_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BleMockError::InvalidSighting(String::new()).error_code(),
            "INVALID_SIGHTING"
        );
        assert_eq!(
            BleMockError::InvalidTransition {
                from: AdvertiserState::Off,
                to: AdvertiserState::Advertising,
            }
            .error_code(),
            "INVALID_TRANSITION"
        );
    }

    #[test]
    fn test_from_io_error() {
        let err: BleMockError = IoErr::new(ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, BleMockError::Io(_)));
        assert_eq!(err.error_code(), "IO_ERROR");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: BleMockError = json_err.into();
        assert!(matches!(err, BleMockError::Serialization(_)));
    }

    #[test]
    fn test_error_display_messages() {
        let err = BleMockError::PrerequisiteMissing("adb not found".into());
        assert!(err.to_string().contains("adb not found"));

        let err = BleMockError::Persistence {
            path: PathBuf::from("/tmp/devices.json"),
            message: "disk full".into(),
        };
        assert!(err.to_string().contains("/tmp/devices.json"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BleMockError>();
        assert_sync::<BleMockError>();
    }
}
