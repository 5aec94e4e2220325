//! Firmware container parsing
//!
//! Classifies raw firmware bytes as either a legacy JSON envelope (`.apj`)
//! or a native ELF binary by sniffing the leading bytes, and extracts the
//! metadata validation needs.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use goblin::elf::header::{self, Header};
use goblin::elf::Elf;
use serde::Deserialize;

use crate::arch::{ARCH_AARCH64, ARCH_ARM, ARCH_X64};
use crate::config;
use crate::error::{Error, Result};
use crate::log_debug;
use crate::platform::FirmwareFormat;

const MODULE: &str = "format";

/// Shortest input that could hold either container's signature
const MIN_SIGNATURE_LEN: usize = 4;

/// Raw JSON layout of a legacy envelope; unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    board_id: Option<i64>,
    image: Option<String>,
    image_size: Option<u64>,
    git_identity: Option<String>,
    build_time: Option<i64>,
    magic: Option<String>,
}

/// Metadata of a legacy envelope whose embedded image decoded cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEnvelope {
    pub board_id: Option<i64>,
    /// Length of the inflated image in bytes
    pub image_size: u64,
    pub git_identity: Option<String>,
    pub build_time: Option<DateTime<Utc>>,
    pub magic: Option<String>,
}

/// ELF word size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

/// The ELF header fields validation cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeHeader {
    pub class: ElfClass,
    pub little_endian: bool,
    pub machine: u16,
    pub declared_archs: BTreeSet<&'static str>,
}

/// A parsed firmware container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareImage {
    Legacy(LegacyEnvelope),
    Native(NativeHeader),
}

impl FirmwareImage {
    pub fn format(&self) -> FirmwareFormat {
        match self {
            FirmwareImage::Legacy(_) => FirmwareFormat::Legacy,
            FirmwareImage::Native(_) => FirmwareFormat::Native,
        }
    }

    /// Architectures the artifact claims to target.
    ///
    /// `None` for legacy envelopes, which carry no architecture tag.
    pub fn declared_archs(&self) -> Option<&BTreeSet<&'static str>> {
        match self {
            FirmwareImage::Legacy(_) => None,
            FirmwareImage::Native(native) => Some(&native.declared_archs),
        }
    }

    pub fn board_id(&self) -> Option<i64> {
        match self {
            FirmwareImage::Legacy(envelope) => envelope.board_id,
            FirmwareImage::Native(_) => None,
        }
    }
}

/// Architecture name for an ELF `e_machine` value
pub fn machine_to_arch(machine: u16) -> Option<&'static str> {
    match machine {
        header::EM_ARM => Some(ARCH_ARM),
        header::EM_AARCH64 => Some(ARCH_AARCH64),
        header::EM_X86_64 => Some(ARCH_X64),
        header::EM_386 => Some("x86"),
        header::EM_RISCV => Some("RISC-V"),
        _ => None,
    }
}

/// Parse firmware bytes of either format
pub fn parse(bytes: &[u8]) -> Result<FirmwareImage> {
    if bytes.len() < MIN_SIGNATURE_LEN {
        return Err(Error::invalid_firmware(format!(
            "file too short ({} bytes) to be firmware",
            bytes.len()
        )));
    }

    if bytes.starts_with(header::ELFMAG) {
        return parse_native(bytes).map(FirmwareImage::Native);
    }

    let text_start = bytes.iter().position(|b| !b.is_ascii_whitespace());
    match text_start.map(|i| bytes[i]) {
        Some(b'{') => parse_legacy(bytes).map(FirmwareImage::Legacy),
        _ => Err(Error::invalid_firmware(
            "unrecognised firmware signature (neither ELF nor APJ)",
        )),
    }
}

/// Read and parse a firmware file
pub fn parse_file(path: &Path) -> Result<FirmwareImage> {
    let bytes = std::fs::read(path)?;
    parse(&bytes)
}

fn parse_native(bytes: &[u8]) -> Result<NativeHeader> {
    let elf_header: Header = Elf::parse_header(bytes)
        .map_err(|e| Error::invalid_firmware(format!("malformed ELF header: {}", e)))?;

    let class = match elf_header.e_ident[header::EI_CLASS] {
        header::ELFCLASS32 => ElfClass::Elf32,
        header::ELFCLASS64 => ElfClass::Elf64,
        other => {
            return Err(Error::invalid_firmware(format!(
                "unsupported ELF class {}",
                other
            )))
        }
    };

    let declared_archs: BTreeSet<_> = machine_to_arch(elf_header.e_machine).into_iter().collect();
    log_debug!(
        MODULE,
        "ELF {:?} machine {} declares {:?}",
        class,
        elf_header.e_machine,
        declared_archs
    );

    Ok(NativeHeader {
        class,
        little_endian: elf_header.e_ident[header::EI_DATA] == header::ELFDATA2LSB,
        machine: elf_header.e_machine,
        declared_archs,
    })
}

fn parse_legacy(bytes: &[u8]) -> Result<LegacyEnvelope> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| Error::invalid_firmware(format!("malformed APJ envelope: {}", e)))?;

    let encoded = raw
        .image
        .ok_or_else(|| Error::invalid_firmware("APJ envelope has no image"))?;
    let compressed = BASE64
        .decode(encoded.trim())
        .map_err(|e| Error::invalid_firmware(format!("APJ image is not valid base64: {}", e)))?;

    let limit = raw
        .image_size
        .unwrap_or(config::firmware::MAX_LEGACY_IMAGE_BYTES)
        .min(config::firmware::MAX_LEGACY_IMAGE_BYTES);
    let mut image = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .take(limit.saturating_add(1))
        .read_to_end(&mut image)
        .map_err(|e| Error::invalid_firmware(format!("APJ image failed to inflate: {}", e)))?;
    let image_size = image.len() as u64;
    if image_size > limit {
        return Err(Error::invalid_firmware(format!(
            "APJ image inflates past {} bytes",
            limit
        )));
    }

    if let Some(expected) = raw.image_size {
        if expected != image_size {
            return Err(Error::invalid_firmware(format!(
                "APJ image_size says {} bytes, image has {}",
                expected, image_size
            )));
        }
    }

    log_debug!(
        MODULE,
        "APJ envelope for board {:?}, {} byte image",
        raw.board_id,
        image_size
    );

    Ok(LegacyEnvelope {
        board_id: raw.board_id,
        image_size,
        git_identity: raw.git_identity,
        build_time: raw
            .build_time
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        magic: raw.magic,
    })
}
