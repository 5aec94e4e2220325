//! Configuration constants
//!
//! Compile-time defaults grouped by concern. Anything that varies per
//! deployment is passed to constructors instead.

pub mod app {
    /// Application name, used for cache directories
    pub const NAME: &str = "ardupilot-firmware";

    /// User agent sent with every HTTP request
    pub const USER_AGENT: &str = concat!("ardupilot-firmware/", env!("CARGO_PKG_VERSION"));
}

pub mod urls {
    /// Default firmware manifest location
    pub const MANIFEST: &str = "https://firmware.ardupilot.org/manifest.json.gz";
}

pub mod download {
    /// Seconds allowed to establish a connection
    pub const CONNECT_TIMEOUT_SECS: u64 = 30;

    /// Prefix for temporary firmware artifacts
    pub const TEMP_PREFIX: &str = "firmware-";

    /// Suffix for temporary firmware artifacts
    pub const TEMP_SUFFIX: &str = ".download";

    /// Buffer size used when hashing files
    pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

    /// Largest buffer reserved up front from a server-announced length
    pub const MAX_PREALLOC_BYTES: usize = 8 * 1024 * 1024;
}

pub mod firmware {
    /// Largest legacy image inflated from an APJ envelope
    pub const MAX_LEGACY_IMAGE_BYTES: u64 = 32 * 1024 * 1024;
}

pub mod logging {
    /// Log download progress every N megabytes
    pub const DOWNLOAD_LOG_INTERVAL_MB: u64 = 1;
}

pub mod install {
    /// Prefix for the staging file written next to the destination
    pub const TEMP_PREFIX: &str = ".firmware-";

    /// Suffix for the staging file written next to the destination
    pub const TEMP_SUFFIX: &str = ".installing";

    /// Directory below the cache dir holding installed firmware
    pub const FIRMWARE_DIR: &str = "firmware";

    /// Permissions given to installed native binaries
    #[cfg(unix)]
    pub const EXECUTABLE_MODE: u32 = 0o755;
}
