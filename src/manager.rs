//! Firmware manager
//!
//! Runs the whole pipeline for a board: resolve, download, validate and
//! install. Whatever happens, the intermediate artifact is disposed before
//! returning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::{FirmwareCatalog, FirmwareVersion};
use crate::download::{FirmwareArtifact, FirmwareDownloader};
use crate::error::{Error, Result};
use crate::install::FirmwareInstaller;
use crate::platform::{FlightController, Vehicle};
use crate::validator::FirmwareValidator;
use crate::{log_error, log_info, log_warn};

const MODULE: &str = "manager";

pub struct FirmwareManager {
    downloader: FirmwareDownloader,
    validator: FirmwareValidator,
    installer: FirmwareInstaller,
}

impl FirmwareManager {
    pub fn new(
        downloader: FirmwareDownloader,
        validator: FirmwareValidator,
        installer: FirmwareInstaller,
    ) -> Self {
        Self {
            downloader,
            validator,
            installer,
        }
    }

    /// Manager using the public manifest, the cache directory and the real host
    pub fn with_defaults() -> Result<Self> {
        let catalog = Arc::new(FirmwareCatalog::with_defaults()?);
        Ok(Self::new(
            FirmwareDownloader::with_default_dir(catalog),
            FirmwareValidator::default(),
            FirmwareInstaller::default(),
        ))
    }

    pub fn downloader(&self) -> &FirmwareDownloader {
        &self.downloader
    }

    pub fn installer(&self) -> &FirmwareInstaller {
        &self.installer
    }

    /// Download, validate and install firmware for `board`.
    ///
    /// Returns the path the firmware was installed to.
    pub async fn install_firmware(
        &self,
        vehicle: Vehicle,
        board: &FlightController,
        version: Option<FirmwareVersion>,
    ) -> Result<PathBuf> {
        log_info!(
            MODULE,
            "Installing {} firmware on {} ({})",
            vehicle,
            board.name,
            board.platform
        );

        let artifact = self
            .downloader
            .download(vehicle, board.platform, version)
            .await
            .map_err(|e| {
                log_error!(MODULE, "Download failed: {}", e);
                e
            })?;

        self.commit(artifact, board).await
    }

    /// Validate and install a firmware file supplied by the user.
    ///
    /// The file is consumed: it is deleted once the install finishes or fails.
    pub async fn install_from_file(&self, path: &Path, board: &FlightController) -> Result<PathBuf> {
        log_info!(
            MODULE,
            "Installing firmware file {} on {} ({})",
            path.display(),
            board.name,
            board.platform
        );

        let artifact = FirmwareArtifact::from_local_file(path)?;
        self.commit(artifact, board).await
    }

    async fn commit(&self, artifact: FirmwareArtifact, board: &FlightController) -> Result<PathBuf> {
        let validator = self.validator.clone();
        let installer = self.installer.clone();
        let board = board.clone();
        let destination = self.installer.destination_for(&board);
        let artifact_path = artifact.path().to_path_buf();

        let joined = tokio::task::spawn_blocking(move || {
            let result = validator
                .validate(&artifact, board.platform)
                .and_then(|_| installer.install(&artifact, &board, &destination));
            if let Err(e) = artifact.dispose() {
                log_warn!(MODULE, "Failed to dispose artifact: {}", e);
            }
            result
        })
        .await;

        let result = joined.unwrap_or_else(|e| {
            discard_artifact(&artifact_path);
            Err(Error::Io(std::io::Error::other(format!(
                "install task failed: {}",
                e
            ))))
        });

        match &result {
            Ok(path) => log_info!(MODULE, "Firmware installed at {}", path.display()),
            Err(e) => log_error!(MODULE, "Firmware install failed: {}", e),
        }
        result
    }
}

/// Remove an artifact left behind by an aborted install task
fn discard_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log_warn!(
            MODULE,
            "Failed to remove artifact {}: {}",
            path.display(),
            e
        ),
    }
}
