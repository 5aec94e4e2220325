//! Download module
//!
//! Resolves a firmware request through the catalog and streams the artifact
//! into a fresh temporary file owned by the caller.

use std::fmt;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use crate::catalog::{FirmwareCatalog, FirmwareVersion, ManifestEntry};
use crate::config;
use crate::error::{Error, Result};
use crate::platform::{Platform, Vehicle};
use crate::utils::{bytes_to_mb, filename_from_url, get_cache_dir, sha256_file, ProgressTracker};
use crate::{log_debug, log_error, log_info};

const MODULE: &str = "download";

/// Progress and cancellation handle for a single download.
///
/// Each download gets its own state; pass one in with
/// [`FirmwareDownloader::download_with_state`] to watch or cancel it.
#[derive(Debug, Default)]
pub struct DownloadState {
    pub total_bytes: AtomicU64,
    pub downloaded_bytes: AtomicU64,
    cancel: CancellationToken,
}

impl DownloadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the download, even while it waits on the network
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once [`DownloadState::cancel`] has been called
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Run `operation` unless the download is cancelled first
async fn until_cancelled<T>(
    state: &DownloadState,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = state.cancelled() => {
            log_info!(MODULE, "Download cancelled by user");
            Err(Error::Cancelled("download cancelled".to_string()))
        }
        result = operation => result,
    }
}

/// A downloaded, not yet installed firmware file.
///
/// The file is never deleted implicitly; call [`FirmwareArtifact::dispose`]
/// once it is no longer needed.
#[derive(Debug)]
pub struct FirmwareArtifact {
    path: PathBuf,
    size: u64,
    sha256: String,
    entry: Option<ManifestEntry>,
}

impl FirmwareArtifact {
    /// Wrap a firmware file that was obtained some other way (e.g. uploaded)
    pub fn from_local_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(Error::invalid_firmware(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let sha256 = sha256_file(&path)?;
        Ok(Self {
            path,
            size: metadata.len(),
            sha256,
            entry: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Lowercase hex SHA-256 of the artifact bytes
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Manifest row this artifact was downloaded for, if any
    pub fn entry(&self) -> Option<&ManifestEntry> {
        self.entry.as_ref()
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(&self.path)?)
    }

    /// Delete the backing file
    pub fn dispose(self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                log_debug!(MODULE, "Disposed artifact {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Display for FirmwareArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Fetches firmware artifacts described by the catalog
pub struct FirmwareDownloader {
    catalog: Arc<FirmwareCatalog>,
    download_dir: PathBuf,
    timeout: Option<Duration>,
}

impl FirmwareDownloader {
    pub fn new(catalog: Arc<FirmwareCatalog>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            download_dir: download_dir.into(),
            timeout: None,
        }
    }

    /// Downloader writing into `<cache dir>/downloads`
    pub fn with_default_dir(catalog: Arc<FirmwareCatalog>) -> Self {
        Self::new(catalog, get_cache_dir(config::app::NAME).join("downloads"))
    }

    /// Abort downloads that take longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn catalog(&self) -> &Arc<FirmwareCatalog> {
        &self.catalog
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Fetch (or refresh) the manifest
    pub async fn download_manifest(&self) -> Result<()> {
        self.catalog.load().await.map(|_| ())
    }

    /// Resolve and download firmware; `None` means the stable release
    pub async fn download(
        &self,
        vehicle: Vehicle,
        platform: Platform,
        version: Option<FirmwareVersion>,
    ) -> Result<FirmwareArtifact> {
        self.download_with_state(vehicle, platform, version, &DownloadState::new())
            .await
    }

    /// Like [`FirmwareDownloader::download`], reporting into `state`
    pub async fn download_with_state(
        &self,
        vehicle: Vehicle,
        platform: Platform,
        version: Option<FirmwareVersion>,
        state: &DownloadState,
    ) -> Result<FirmwareArtifact> {
        let version = version.unwrap_or_default();
        log_info!(MODULE, "Download requested: {} {} ({})", vehicle, platform, version);

        let entry = self.catalog.resolve(vehicle, platform, &version).await?;
        self.download_entry(entry, state).await
    }

    /// Download the artifact behind a manifest row
    pub async fn download_entry(
        &self,
        entry: ManifestEntry,
        state: &DownloadState,
    ) -> Result<FirmwareArtifact> {
        std::fs::create_dir_all(&self.download_dir)?;

        let name = filename_from_url(&entry.url).unwrap_or("firmware");
        // Dropping the NamedTempFile on any error path removes the partial file
        let mut temp_file = tempfile::Builder::new()
            .prefix(&format!("{}{}-", config::download::TEMP_PREFIX, name))
            .suffix(config::download::TEMP_SUFFIX)
            .tempfile_in(&self.download_dir)?;
        log_debug!(MODULE, "Temp file: {}", temp_file.path().display());

        let transfer = self.transfer(&entry.url, &mut temp_file, state);
        let (size, sha256) = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, transfer).await.map_err(|_| {
                log_error!(MODULE, "Download of {} timed out", entry.url);
                Error::Cancelled(format!("download timed out after {:?}", limit))
            })??,
            None => transfer.await?,
        };

        if let Some(expected) = entry.sha256.as_deref() {
            if expected != sha256 {
                log_error!(
                    MODULE,
                    "SHA256 verification FAILED! Expected: {}, Got: {}",
                    expected,
                    sha256
                );
                return Err(Error::download_failed(format!(
                    "SHA256 mismatch: expected {}, got {}",
                    expected, sha256
                )));
            }
            log_info!(MODULE, "SHA256 verification passed");
        }

        let (_, path) = temp_file.keep().map_err(|e| Error::Io(e.error))?;
        log_info!(MODULE, "Firmware ready: {}", path.display());

        Ok(FirmwareArtifact {
            path,
            size,
            sha256,
            entry: Some(entry),
        })
    }

    async fn transfer(
        &self,
        url: &str,
        temp_file: &mut NamedTempFile,
        state: &DownloadState,
    ) -> Result<(u64, String)> {
        let transport = self.catalog.transport();
        let mut response = until_cancelled(state, transport.fetch(url)).await?;

        let total_size = response.content_length.unwrap_or(0);
        state.total_bytes.store(total_size, Ordering::SeqCst);
        log_info!(
            MODULE,
            "Download size: {} bytes ({:.2} MB)",
            total_size,
            bytes_to_mb(total_size)
        );

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut tracker = ProgressTracker::new(
            "Download",
            MODULE,
            total_size,
            config::logging::DOWNLOAD_LOG_INTERVAL_MB,
        );

        loop {
            let next = until_cancelled(state, async { Ok(response.body.next().await) }).await?;
            let Some(chunk) = next else {
                break;
            };

            let chunk = chunk?;
            temp_file
                .write_all(&chunk)
                .map_err(|e| Error::download_failed(format!("Failed to write chunk: {}", e)))?;
            hasher.update(&chunk);

            downloaded += chunk.len() as u64;
            state.downloaded_bytes.store(downloaded, Ordering::SeqCst);
            tracker.update(chunk.len() as u64);
        }

        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| Error::download_failed(format!("Failed to flush download: {}", e)))?;
        tracker.finish();

        Ok((downloaded, hex::encode(hasher.finalize())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FetchResponse, MemoryTransport, Transport};
    use crate::utils::sha256_hex;
    use bytes::Bytes;
    use futures_util::stream::{self, BoxStream};

    const MANIFEST_URL: &str = "mem://manifest.json";

    fn setup(manifest: serde_json::Value) -> (Arc<MemoryTransport>, Arc<FirmwareCatalog>) {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(MANIFEST_URL, manifest.to_string());
        let catalog = Arc::new(FirmwareCatalog::new(MANIFEST_URL, transport.clone()));
        (transport, catalog)
    }

    fn leftovers(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_download_writes_caller_owned_file() {
        let (transport, catalog) = setup(serde_json::json!({
            "Sub": { "Navigator": { "stable": { "url": "mem://fw/ardusub", "format": "native" } } }
        }));
        let body = vec![0x42u8; 300_000];
        transport.insert("mem://fw/ardusub", body.clone());

        let dir = tempfile::tempdir().unwrap();
        let downloader = FirmwareDownloader::new(catalog, dir.path());
        let state = DownloadState::new();
        let artifact = downloader
            .download_with_state(Vehicle::Sub, Platform::Navigator, None, &state)
            .await
            .unwrap();

        assert!(artifact.path().starts_with(dir.path()));
        assert_eq!(artifact.read().unwrap(), body);
        assert_eq!(artifact.size(), body.len() as u64);
        assert_eq!(artifact.sha256(), sha256_hex(&body));
        assert_eq!(artifact.entry().map(|e| e.platform), Some(Platform::Navigator));
        assert_eq!(state.total_bytes.load(Ordering::SeqCst), body.len() as u64);
        assert_eq!(state.downloaded_bytes.load(Ordering::SeqCst), body.len() as u64);

        let path = artifact.path().to_path_buf();
        artifact.dispose().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unknown_request_creates_no_file() {
        let (_, catalog) = setup(serde_json::json!({}));
        let dir = tempfile::tempdir().unwrap();
        let downloader = FirmwareDownloader::new(catalog, dir.path());

        let err = downloader
            .download(Vehicle::Plane, Platform::Pixhawk4, Some(FirmwareVersion::Dev))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(leftovers(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_broken_transfer_leaves_nothing_behind() {
        let (transport, catalog) = setup(serde_json::json!({
            "Sub": { "Pixhawk1": { "stable": { "url": "mem://fw/broken.apj", "format": "legacy" } } }
        }));
        transport.insert_broken("mem://fw/broken.apj", vec![1u8; 1000]);

        let dir = tempfile::tempdir().unwrap();
        let downloader = FirmwareDownloader::new(catalog, dir.path());
        let err = downloader
            .download(Vehicle::Sub, Platform::Pixhawk1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DownloadFailed(_)));
        assert_eq!(leftovers(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_rejected() {
        let (transport, catalog) = setup(serde_json::json!({
            "Sub": { "Navigator": { "stable": {
                "url": "mem://fw/ardusub", "format": "native", "sha256": "00".repeat(32)
            } } }
        }));
        transport.insert("mem://fw/ardusub", b"\x7fELF tampered".to_vec());

        let dir = tempfile::tempdir().unwrap();
        let downloader = FirmwareDownloader::new(catalog, dir.path());
        let err = downloader
            .download(Vehicle::Sub, Platform::Navigator, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SHA256 mismatch"));
        assert_eq!(leftovers(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_matching_checksum_is_accepted() {
        let body = b"\x7fELF good".to_vec();
        let (transport, catalog) = setup(serde_json::json!({
            "Sub": { "Navigator": { "stable": {
                "url": "mem://fw/ardusub", "format": "native", "sha256": sha256_hex(&body)
            } } }
        }));
        transport.insert("mem://fw/ardusub", body);

        let dir = tempfile::tempdir().unwrap();
        let downloader = FirmwareDownloader::new(catalog, dir.path());
        let artifact = downloader
            .download(Vehicle::Sub, Platform::Navigator, None)
            .await
            .unwrap();
        artifact.dispose().unwrap();
    }

    /// Serves the manifest, then one firmware chunk followed by a stall
    struct StallingTransport {
        stall: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl Transport for StallingTransport {
        async fn fetch(&self, url: &str) -> Result<FetchResponse> {
            if url == MANIFEST_URL {
                let manifest = serde_json::json!({
                    "Sub": { "Navigator": { "stable": { "url": "mem://fw/ardusub", "format": "native" } } }
                });
                return Ok(FetchResponse {
                    content_length: None,
                    body: stream::iter([Ok(Bytes::from(manifest.to_string()))]).boxed(),
                });
            }

            let head = stream::iter([Ok(Bytes::from_static(b"\x7fELF"))]);
            let body: BoxStream<'static, Result<Bytes>> = match self.stall {
                Some(delay) => head
                    .chain(stream::once(async move {
                        tokio::time::sleep(delay).await;
                        Ok(Bytes::from_static(b"rest"))
                    }))
                    .boxed(),
                None => head.chain(stream::pending()).boxed(),
            };
            Ok(FetchResponse {
                content_length: Some(8),
                body,
            })
        }
    }

    fn stalling(stall: Option<Duration>) -> Arc<FirmwareCatalog> {
        Arc::new(FirmwareCatalog::new(
            MANIFEST_URL,
            Arc::new(StallingTransport { stall }),
        ))
    }

    async fn cancel_after_first_chunk(state: &DownloadState) {
        while state.downloaded_bytes.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        state.cancel();
    }

    #[tokio::test]
    async fn test_cancelled_download_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let downloader =
            FirmwareDownloader::new(stalling(Some(Duration::from_millis(200))), dir.path());

        let state = DownloadState::new();
        let (result, ()) = tokio::join!(
            downloader.download_with_state(Vehicle::Sub, Platform::Navigator, None, &state),
            cancel_after_first_chunk(&state),
        );

        assert!(matches!(result.unwrap_err(), Error::Cancelled(_)));
        assert_eq!(leftovers(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_stalled_download_can_be_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FirmwareDownloader::new(stalling(None), dir.path());

        let state = DownloadState::new();
        let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                downloader.download_with_state(Vehicle::Sub, Platform::Navigator, None, &state),
                cancel_after_first_chunk(&state),
            )
        })
        .await
        .expect("cancel did not interrupt the stalled transfer");

        assert!(matches!(result.unwrap_err(), Error::Cancelled(_)));
        assert_eq!(leftovers(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FirmwareDownloader::new(stalling(None), dir.path());

        let state = DownloadState::new();
        state.cancel();
        let err = downloader
            .download_with_state(Vehicle::Sub, Platform::Navigator, None, &state)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled(_)));
        assert_eq!(leftovers(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_overlapping_downloads_keep_their_own_state() {
        let dir = tempfile::tempdir().unwrap();
        let downloader =
            FirmwareDownloader::new(stalling(Some(Duration::from_millis(200))), dir.path());

        let first = DownloadState::new();
        let second = DownloadState::new();
        let (cancelled, (completed, ())) = tokio::join!(
            downloader.download_with_state(Vehicle::Sub, Platform::Navigator, None, &first),
            async {
                while first.downloaded_bytes.load(Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                // Second download starts mid-transfer, first is cancelled once both are running
                tokio::join!(
                    downloader.download_with_state(Vehicle::Sub, Platform::Navigator, None, &second),
                    async {
                        while second.downloaded_bytes.load(Ordering::SeqCst) == 0 {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                        first.cancel();
                    },
                )
            },
        );

        assert!(matches!(cancelled.unwrap_err(), Error::Cancelled(_)));
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        let artifact = completed.unwrap();
        assert_eq!(artifact.read().unwrap(), b"\x7fELFrest");
        assert_eq!(second.downloaded_bytes.load(Ordering::SeqCst), 8);
        assert_eq!(leftovers(dir.path()), 1);
        artifact.dispose().unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_download_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FirmwareDownloader::new(stalling(None), dir.path())
            .with_timeout(Duration::from_millis(50));

        let err = downloader
            .download(Vehicle::Sub, Platform::Navigator, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled(_)));
        assert!(err.to_string().contains("timed out"));
        assert_eq!(leftovers(dir.path()), 0);
    }

    #[test]
    fn test_local_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.apj");
        std::fs::write(&path, b"{}").unwrap();

        let artifact = FirmwareArtifact::from_local_file(&path).unwrap();
        assert_eq!(artifact.size(), 2);
        assert!(artifact.entry().is_none());
        assert_eq!(artifact.to_string(), path.display().to_string());

        assert!(FirmwareArtifact::from_local_file(dir.path()).is_err());
        assert!(FirmwareArtifact::from_local_file(dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_dispose_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw");
        std::fs::write(&path, b"x").unwrap();
        FirmwareArtifact::from_local_file(&path).unwrap().dispose().unwrap();
        std::fs::write(&path, b"x").unwrap();
        let artifact = FirmwareArtifact::from_local_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        artifact.dispose().unwrap();
    }
}
