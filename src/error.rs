//! Error types
//!
//! Every failure of the acquisition-and-validation pipeline maps onto one
//! variant here. None of them are retried internally.

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::FirmwareVersion;
use crate::platform::{Platform, Vehicle};

/// Errors produced while resolving, downloading, validating or installing firmware.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed container, unrecognised format or architecture mismatch.
    #[error("invalid firmware file: {0}")]
    InvalidFirmwareFile(String),

    /// No catalog row for the requested tuple.
    #[error("no firmware found for {vehicle} on {platform} (version: {version})")]
    ManifestEntryNotFound {
        vehicle: Vehicle,
        platform: Platform,
        version: FirmwareVersion,
    },

    /// The manifest body could not be decoded.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Transport-level failure fetching the manifest or firmware bytes.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// The caller cancelled the operation or it timed out.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Filesystem failure while committing an artifact to its destination.
    #[error("failed to install firmware to {path}: {source}")]
    InstallationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_firmware(message: impl Into<String>) -> Self {
        Self::InvalidFirmwareFile(message.into())
    }

    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed(message.into())
    }

    pub fn installation_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::InstallationFailed {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn is_invalid_firmware(&self) -> bool {
        matches!(self, Self::InvalidFirmwareFile(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ManifestEntryNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::ManifestEntryNotFound {
            vehicle: Vehicle::Sub,
            platform: Platform::Navigator,
            version: FirmwareVersion::Dev,
        };
        assert_eq!(
            err.to_string(),
            "no firmware found for Sub on Navigator (version: dev)"
        );
        assert!(err.is_not_found());
        assert!(!err.is_invalid_firmware());
    }

    #[test]
    fn test_installation_failed_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = Error::installation_failed("/firmware/ardupilot.elf", io);
        let msg = err.to_string();
        assert!(msg.contains("/firmware/ardupilot.elf"));
        assert!(msg.contains("read-only"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
