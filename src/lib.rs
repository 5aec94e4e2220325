//! ArduPilot Firmware - fetch, validate and install flight-controller firmware
//!
//! Resolves a (vehicle, platform, version) request against the firmware
//! manifest, downloads the artifact, checks that it suits both the board and
//! the machine doing the installing, and commits it to disk atomically.

pub mod logging;

pub mod arch;
pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod format;
pub mod install;
pub mod manager;
pub mod platform;
pub mod transport;
pub mod utils;
pub mod validator;

pub use arch::{accepted_architectures, FixedHost, HostArchitecture, SystemHost};
pub use catalog::{FirmwareCatalog, FirmwareVersion, Manifest, ManifestEntry};
pub use download::{DownloadState, FirmwareArtifact, FirmwareDownloader};
pub use error::{Error, Result};
pub use format::FirmwareImage;
pub use install::FirmwareInstaller;
pub use manager::FirmwareManager;
pub use platform::{FirmwareFormat, FlightController, Platform, PlatformType, Vehicle};
pub use transport::{HttpTransport, MemoryTransport, Transport};
pub use validator::{validate_firmware, FirmwareValidator};
