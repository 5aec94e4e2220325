//! Install module
//!
//! Commits a validated artifact to its final location. The bytes are staged
//! in a sibling temporary file and renamed over the destination, so a reader
//! of the destination sees either the old firmware or the new one.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use goblin::elf::header::ELFMAG;
use once_cell::sync::Lazy;

use crate::config;
use crate::download::FirmwareArtifact;
use crate::error::{Error, Result};
use crate::platform::FlightController;
use crate::utils::{format_size, get_cache_dir};
use crate::{log_debug, log_info};

const MODULE: &str = "install";

type LockMap = HashMap<PathBuf, Arc<Mutex<()>>>;

/// One lock per destination; installs to different paths run concurrently
static DESTINATION_LOCKS: Lazy<Mutex<LockMap>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn lock_map() -> MutexGuard<'static, LockMap> {
    DESTINATION_LOCKS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Key under which `destination` is locked: its canonical parent joined with
/// the file name, so `dir/./fw` and `dir/fw` share one lock. The parent must
/// already exist.
fn lock_key(parent: &Path, destination: &Path) -> io::Result<PathBuf> {
    let parent = std::fs::canonicalize(parent)?;
    Ok(match destination.file_name() {
        Some(name) => parent.join(name),
        None => parent,
    })
}

/// Registration of a destination in the lock map.
///
/// The map entry is dropped together with the last handle, so the map only
/// holds destinations with an install in flight.
struct DestinationLock {
    key: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl DestinationLock {
    fn register(key: PathBuf) -> Self {
        let lock = Arc::clone(lock_map().entry(key.clone()).or_default());
        Self { key, lock }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DestinationLock {
    fn drop(&mut self) {
        let mut locks = lock_map();
        // One reference in the map, one here
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

/// Installs artifacts below a firmware directory
#[derive(Debug, Clone)]
pub struct FirmwareInstaller {
    firmware_dir: PathBuf,
}

impl Default for FirmwareInstaller {
    fn default() -> Self {
        Self::new(get_cache_dir(config::app::NAME).join(config::install::FIRMWARE_DIR))
    }
}

impl FirmwareInstaller {
    pub fn new(firmware_dir: impl Into<PathBuf>) -> Self {
        Self {
            firmware_dir: firmware_dir.into(),
        }
    }

    pub fn firmware_dir(&self) -> &Path {
        &self.firmware_dir
    }

    /// Where firmware for `board` goes when no explicit path is given
    pub fn destination_for(&self, board: &FlightController) -> PathBuf {
        match &board.path {
            Some(path) => path.clone(),
            None => self
                .firmware_dir
                .join(board.platform.as_str())
                .join(board.platform.default_firmware_filename()),
        }
    }

    /// Copy `artifact` to `destination`, replacing any previous file.
    ///
    /// The artifact itself is left in place. Blocking; call from
    /// `spawn_blocking` inside async code.
    pub fn install(
        &self,
        artifact: &FirmwareArtifact,
        board: &FlightController,
        destination: &Path,
    ) -> Result<PathBuf> {
        log_info!(
            MODULE,
            "Installing {} for {} ({}) -> {}",
            artifact.path().display(),
            board.name,
            board.platform,
            destination.display()
        );

        let fail = |e: io::Error| Error::installation_failed(destination, e);

        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(fail)?;

        let registration = DestinationLock::register(lock_key(parent, destination).map_err(fail)?);
        let _guard = registration.lock();

        let mut source = File::open(artifact.path()).map_err(fail)?;
        let mut staged = tempfile::Builder::new()
            .prefix(config::install::TEMP_PREFIX)
            .suffix(config::install::TEMP_SUFFIX)
            .tempfile_in(parent)
            .map_err(fail)?;
        log_debug!(MODULE, "Staging file: {}", staged.path().display());

        let copied = io::copy(&mut source, staged.as_file_mut()).map_err(fail)?;
        staged.as_file().sync_all().map_err(fail)?;

        if is_native_binary(artifact.path()).map_err(fail)? {
            make_executable(staged.path()).map_err(fail)?;
        }

        staged
            .persist(destination)
            .map_err(|e| Error::installation_failed(destination, e.error))?;

        log_info!(
            MODULE,
            "Installed {} to {}",
            format_size(copied),
            destination.display()
        );
        Ok(destination.to_path_buf())
    }
}

fn is_native_binary(path: &Path) -> io::Result<bool> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path)?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic.as_slice() == ELFMAG),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(
        path,
        std::fs::Permissions::from_mode(config::install::EXECUTABLE_MODE),
    )
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
