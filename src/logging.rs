//! Logging module
//!
//! Thin `log_*!` macros over `tracing`. Every event carries the emitting
//! module name as a structured `module` field.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

#[doc(hidden)]
pub use tracing as __tracing;

const DEFAULT_FILTER: &str = "ardupilot_firmware=info";
const DEBUG_FILTER: &str = "ardupilot_firmware=debug";

static FILTER_HANDLE: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

#[macro_export]
macro_rules! log_debug {
    ($module:expr, $($arg:tt)+) => {
        $crate::logging::__tracing::debug!(module = %$module, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_info {
    ($module:expr, $($arg:tt)+) => {
        $crate::logging::__tracing::info!(module = %$module, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($module:expr, $($arg:tt)+) => {
        $crate::logging::__tracing::warn!(module = %$module, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_error {
    ($module:expr, $($arg:tt)+) => {
        $crate::logging::__tracing::error!(module = %$module, $($arg)+)
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the default `info` filter. Calling this
/// more than once is harmless; only the first call installs anything.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let (filter_layer, handle) = reload::Layer::new(filter);

    let subscriber = tracing_subscriber::registry().with(filter_layer).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    if subscriber.try_init().is_ok() {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Switch between the default and the debug filter at runtime.
pub fn set_log_level(debug: bool) {
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    let directive = if debug { DEBUG_FILTER } else { DEFAULT_FILTER };
    if let Err(e) = handle.reload(EnvFilter::new(directive)) {
        log_warn!("logging", "Failed to change log level: {}", e);
    } else {
        log_info!("logging", "Log level set to {}", directive);
    }
}

#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
