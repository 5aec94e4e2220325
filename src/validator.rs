//! Firmware validation
//!
//! Decides whether an artifact may be installed for a platform on the
//! machine doing the installing. Nothing here is cached: every call parses
//! the artifact again.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::arch::{accepted_architectures, HostArchitecture, SystemHost};
use crate::download::FirmwareArtifact;
use crate::error::{Error, Result};
use crate::format::{self, FirmwareImage};
use crate::platform::Platform;
use crate::{log_info, log_warn};

const MODULE: &str = "validator";

/// Validate firmware bytes for `platform` on a host reporting `host_machine_id`.
///
/// Legacy envelopes carry no architecture tag and are accepted on any host
/// once their board id matches the platform. Native binaries must declare
/// at least one architecture the host can execute.
pub fn validate_firmware(
    bytes: &[u8],
    platform: Platform,
    host_machine_id: &str,
) -> Result<FirmwareImage> {
    let image = format::parse(bytes)?;

    if !platform.accepts(image.format()) {
        return Err(Error::invalid_firmware(format!(
            "{} firmware cannot be used on {}",
            image.format(),
            platform
        )));
    }

    match &image {
        FirmwareImage::Legacy(envelope) => {
            if let Some(expected) = platform.board_id() {
                match envelope.board_id {
                    None => {
                        return Err(Error::invalid_firmware(
                            "could not find board_id in the firmware file",
                        ))
                    }
                    Some(found) if found != expected => {
                        return Err(Error::invalid_firmware(format!(
                            "expected board_id {} for {}, found {}",
                            expected, platform, found
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        FirmwareImage::Native(native) => {
            let accepted = accepted_architectures(host_machine_id);
            if native.declared_archs.is_disjoint(&accepted) {
                return Err(Error::invalid_firmware(format!(
                    "firmware targets {} but host {} accepts {}",
                    describe(&native.declared_archs),
                    host_machine_id,
                    describe(&accepted)
                )));
            }
        }
    }

    Ok(image)
}

fn describe(archs: &BTreeSet<&'static str>) -> String {
    if archs.is_empty() {
        "no known architecture".to_string()
    } else {
        archs.iter().copied().collect::<Vec<_>>().join(", ")
    }
}

/// Validates artifacts against the machine this process runs on
#[derive(Clone)]
pub struct FirmwareValidator {
    host: Arc<dyn HostArchitecture>,
}

impl Default for FirmwareValidator {
    fn default() -> Self {
        Self::new(Arc::new(SystemHost))
    }
}

impl FirmwareValidator {
    pub fn new(host: Arc<dyn HostArchitecture>) -> Self {
        Self { host }
    }

    /// Validate `artifact` for `platform`, querying the host architecture now.
    pub fn validate(&self, artifact: &FirmwareArtifact, platform: Platform) -> Result<FirmwareImage> {
        let host_machine_id = self.host.machine();
        let bytes = artifact.read()?;

        match validate_firmware(&bytes, platform, &host_machine_id) {
            Ok(image) => {
                log_info!(
                    MODULE,
                    "{} firmware {} is valid for {} on {}",
                    image.format(),
                    artifact.path().display(),
                    platform,
                    host_machine_id
                );
                Ok(image)
            }
            Err(e) => {
                log_warn!(
                    MODULE,
                    "Rejected firmware {} for {}: {}",
                    artifact.path().display(),
                    platform,
                    e
                );
                Err(e)
            }
        }
    }
}
