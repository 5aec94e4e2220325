//! Host architecture compatibility
//!
//! Maps the machine identifier of the host (as `uname -m` reports it) to the
//! firmware architectures that host can execute, and provides the seam used to
//! query that identifier.

use std::collections::BTreeSet;

use crate::log_debug;

const MODULE: &str = "arch";

/// Declared architecture names, as derived from ELF machine types
pub const ARCH_ARM: &str = "ARM";
pub const ARCH_AARCH64: &str = "AArch64";
pub const ARCH_X64: &str = "x64";

/// Firmware architectures a host may execute.
///
/// Unknown hosts get an empty set, meaning nothing can be installed there.
pub fn accepted_architectures(host_machine_id: &str) -> BTreeSet<&'static str> {
    let accepted: &[&'static str] = match host_machine_id {
        // 64-bit ARM runs 32-bit ARM code as well
        "aarch64" | "arm64" => &[ARCH_AARCH64, ARCH_ARM],
        "armv7l" | "arm" => &[ARCH_ARM],
        "x86_64" | "x64" | "amd64" => &[ARCH_X64],
        _ => &[],
    };

    if accepted.is_empty() {
        log_debug!(MODULE, "No firmware architecture accepted on host {}", host_machine_id);
    }
    accepted.iter().copied().collect()
}

/// Source of the running machine's architecture identifier
pub trait HostArchitecture: Send + Sync {
    fn machine(&self) -> String;
}

/// Queries the machine the process is running on
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl HostArchitecture for SystemHost {
    fn machine(&self) -> String {
        uname_machine().unwrap_or_else(|| std::env::consts::ARCH.to_string())
    }
}

#[cfg(unix)]
fn uname_machine() -> Option<String> {
    use std::ffi::CStr;

    // SAFETY: utsname is plain old data and uname only writes into it.
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return None;
    }
    // SAFETY: uname NUL-terminates every field on success.
    let machine = unsafe { CStr::from_ptr(uts.machine.as_ptr()) };
    machine
        .to_str()
        .ok()
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

#[cfg(not(unix))]
fn uname_machine() -> Option<String> {
    None
}

/// Always reports the same machine identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedHost(pub String);

impl FixedHost {
    pub fn new(machine: impl Into<String>) -> Self {
        Self(machine.into())
    }
}

impl HostArchitecture for FixedHost {
    fn machine(&self) -> String {
        self.0.clone()
    }
}
