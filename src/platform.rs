//! Vehicle and board models
//!
//! Closed enumerations used as catalog keys, plus the per-platform metadata
//! that validation and installation rely on.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Vehicle firmware family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Vehicle {
    Sub,
    Rover,
    Copter,
    Plane,
}

impl Vehicle {
    pub const ALL: [Vehicle; 4] = [Vehicle::Sub, Vehicle::Rover, Vehicle::Copter, Vehicle::Plane];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vehicle::Sub => "Sub",
            Vehicle::Rover => "Rover",
            Vehicle::Copter => "Copter",
            Vehicle::Plane => "Plane",
        }
    }
}

impl fmt::Display for Vehicle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vehicle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vehicle::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown vehicle: {}", s))
    }
}

/// How a board is attached, which decides the firmware container it takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformType {
    /// Standalone MCU flashed over a serial bootloader
    Serial,
    /// Board driven by a Linux companion computer running the autopilot binary
    Linux,
    /// Software-in-the-loop simulation on the host
    Sitl,
}

/// Firmware container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareFormat {
    /// JSON envelope around a compressed image (`.apj`)
    #[serde(alias = "apj", alias = "APJ")]
    Legacy,
    /// ELF executable
    #[serde(alias = "elf", alias = "ELF")]
    Native,
}

impl fmt::Display for FirmwareFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareFormat::Legacy => f.write_str("legacy"),
            FirmwareFormat::Native => f.write_str("native"),
        }
    }
}

/// Supported flight-controller boards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    Pixhawk1,
    Pixhawk4,
    Pixhawk6X,
    Pixhawk6C,
    CubeOrange,
    Navigator,
    #[serde(rename = "SITL")]
    Sitl,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::Pixhawk1,
        Platform::Pixhawk4,
        Platform::Pixhawk6X,
        Platform::Pixhawk6C,
        Platform::CubeOrange,
        Platform::Navigator,
        Platform::Sitl,
    ];

    /// Name used in manifests and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Pixhawk1 => "Pixhawk1",
            Platform::Pixhawk4 => "Pixhawk4",
            Platform::Pixhawk6X => "Pixhawk6X",
            Platform::Pixhawk6C => "Pixhawk6C",
            Platform::CubeOrange => "CubeOrange",
            Platform::Navigator => "Navigator",
            Platform::Sitl => "SITL",
        }
    }

    /// Alternative spellings found in upstream manifests
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Platform::Pixhawk1 => &["fmuv2", "fmuv3"],
            Platform::Pixhawk4 => &["fmuv5"],
            Platform::Navigator => &["navigator"],
            Platform::Sitl => &["SITL_x86_64_linux_gnu", "SITL_arm_linux_gnueabihf"],
            _ => &[],
        }
    }

    pub fn platform_type(&self) -> PlatformType {
        match self {
            Platform::Navigator => PlatformType::Linux,
            Platform::Sitl => PlatformType::Sitl,
            _ => PlatformType::Serial,
        }
    }

    /// Board identifier embedded in legacy envelopes built for this board
    pub fn board_id(&self) -> Option<i64> {
        match self {
            Platform::Pixhawk1 => Some(9),
            Platform::Pixhawk4 => Some(50),
            Platform::Pixhawk6X => Some(53),
            Platform::Pixhawk6C => Some(56),
            Platform::CubeOrange => Some(140),
            Platform::Navigator | Platform::Sitl => None,
        }
    }

    pub fn accepted_formats(&self) -> &'static [FirmwareFormat] {
        match self.platform_type() {
            PlatformType::Serial => &[FirmwareFormat::Legacy],
            PlatformType::Linux | PlatformType::Sitl => &[FirmwareFormat::Native],
        }
    }

    pub fn accepts(&self, format: FirmwareFormat) -> bool {
        self.accepted_formats().contains(&format)
    }

    /// File name used when the board record carries no explicit path
    pub fn default_firmware_filename(&self) -> &'static str {
        match self.platform_type() {
            PlatformType::Serial => "ardupilot.apj",
            PlatformType::Linux => "ardupilot.elf",
            PlatformType::Sitl => "ardupilot-sitl.elf",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s) || p.aliases().contains(&s))
            .ok_or_else(|| format!("unknown platform: {}", s))
    }
}

/// A connected board, as reported by board discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightController {
    pub name: String,
    pub manufacturer: String,
    pub platform: Platform,
    /// Where this board's firmware lives, if discovery knows it
    pub path: Option<PathBuf>,
}

impl FlightController {
    pub fn new(name: impl Into<String>, manufacturer: impl Into<String>, platform: Platform) -> Self {
        Self {
            name: name.into(),
            manufacturer: manufacturer.into(),
            platform,
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}
