//! Firmware catalog
//!
//! Fetches the firmware manifest once, keeps it in memory and resolves
//! (vehicle, platform, version) requests against it.
//!
//! Two manifest layouts are understood, both optionally gzip-compressed:
//!
//! - nested: `{ "<vehicle>": { "<platform>": { "<version>": { "url", "format", "sha256"? } } } }`
//! - upstream ArduPilot: `{ "format-version": .., "firmware": [ { "vehicletype", "platform", .. } ] }`

use std::collections::{BTreeMap, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config;
use crate::error::{Error, Result};
use crate::platform::{FirmwareFormat, Platform, Vehicle};
use crate::transport::{HttpTransport, Transport};
use crate::{log_debug, log_error, log_info};

const MODULE: &str = "catalog";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const UPSTREAM_STABLE_PREFIX: &str = "STABLE-";

/// Requested firmware version or channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum FirmwareVersion {
    /// Latest official release
    #[default]
    Stable,
    Beta,
    /// Latest development build
    Dev,
    /// A specific numbered release, e.g. "4.1.0"
    Release(String),
}

impl FirmwareVersion {
    fn semver(&self) -> Option<semver::Version> {
        match self {
            FirmwareVersion::Release(v) => semver::Version::parse(v.trim_start_matches('v')).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareVersion::Stable => f.write_str("stable"),
            FirmwareVersion::Beta => f.write_str("beta"),
            FirmwareVersion::Dev => f.write_str("dev"),
            FirmwareVersion::Release(v) => f.write_str(v),
        }
    }
}

impl FromStr for FirmwareVersion {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        // Upstream labels past releases "STABLE-<version>"
        if let Some(release) = s
            .get(..UPSTREAM_STABLE_PREFIX.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(UPSTREAM_STABLE_PREFIX))
            .map(|_| &s[UPSTREAM_STABLE_PREFIX.len()..])
            .filter(|release| !release.is_empty())
        {
            return Ok(FirmwareVersion::Release(release.to_string()));
        }

        Ok(match s.to_ascii_lowercase().as_str() {
            "" | "stable" | "latest" | "official" => FirmwareVersion::Stable,
            "beta" => FirmwareVersion::Beta,
            "dev" => FirmwareVersion::Dev,
            _ => FirmwareVersion::Release(s.to_string()),
        })
    }
}

impl From<&str> for FirmwareVersion {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(version) => version,
            Err(never) => match never {},
        }
    }
}

/// One resolvable manifest row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub vehicle: Vehicle,
    pub platform: Platform,
    pub version: FirmwareVersion,
    pub url: String,
    pub format: FirmwareFormat,
    /// Expected SHA-256 of the artifact, lowercase hex
    pub sha256: Option<String>,
}

/// Leaf of the nested layout
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NestedLeaf {
    url: String,
    format: FirmwareFormat,
    #[serde(default)]
    sha256: Option<String>,
}

type NestedManifest = BTreeMap<String, BTreeMap<String, BTreeMap<String, NestedLeaf>>>;

/// Row of the upstream ArduPilot layout
#[derive(Debug, Deserialize)]
struct UpstreamRow {
    vehicletype: String,
    platform: String,
    #[serde(rename = "mav-firmware-version-type")]
    version_type: String,
    #[serde(rename = "mav-firmware-version", default)]
    version: Option<String>,
    format: String,
    url: String,
    #[serde(default)]
    latest: u64,
}

/// A loaded, read-only manifest
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parse a manifest body, inflating it first if gzip-compressed
    pub fn parse(body: &[u8]) -> Result<Self> {
        let json = if body.starts_with(&GZIP_MAGIC) {
            let mut inflated = Vec::new();
            GzDecoder::new(body)
                .read_to_end(&mut inflated)
                .map_err(|e| Error::InvalidManifest(format!("gzip error: {}", e)))?;
            inflated
        } else {
            body.to_vec()
        };

        let doc: Value = serde_json::from_slice(&json)
            .map_err(|e| Error::InvalidManifest(format!("malformed JSON: {}", e)))?;

        match doc.get("firmware") {
            Some(Value::Array(rows)) => Ok(Self::from_upstream(rows)),
            _ => Self::from_nested(doc),
        }
    }

    fn from_nested(doc: Value) -> Result<Self> {
        let nested: NestedManifest = serde_json::from_value(doc)
            .map_err(|e| Error::InvalidManifest(format!("unexpected layout: {}", e)))?;

        let mut entries = Vec::new();
        for (vehicle_name, platforms) in nested {
            let Ok(vehicle) = vehicle_name.parse::<Vehicle>() else {
                log_debug!(MODULE, "Skipping unknown vehicle {}", vehicle_name);
                continue;
            };
            for (platform_name, versions) in platforms {
                let Ok(platform) = platform_name.parse::<Platform>() else {
                    log_debug!(MODULE, "Skipping unknown platform {}", platform_name);
                    continue;
                };
                for (version, leaf) in versions {
                    entries.push(ManifestEntry {
                        vehicle,
                        platform,
                        version: FirmwareVersion::from(version.as_str()),
                        url: leaf.url,
                        format: leaf.format,
                        sha256: leaf.sha256.map(|h| h.to_lowercase()),
                    });
                }
            }
        }
        Ok(Self { entries })
    }

    fn from_upstream(rows: &[Value]) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        let mut skipped = 0usize;

        for row in rows {
            let Ok(row) = UpstreamRow::deserialize(row) else {
                skipped += 1;
                continue;
            };
            let (Ok(vehicle), Ok(platform)) = (
                row.vehicletype.parse::<Vehicle>(),
                row.platform.parse::<Platform>(),
            ) else {
                skipped += 1;
                continue;
            };
            let format = match row.format.as_str() {
                "apj" => FirmwareFormat::Legacy,
                "ELF" => FirmwareFormat::Native,
                _ => {
                    skipped += 1;
                    continue;
                }
            };

            let versions = match row.version_type.as_str() {
                "OFFICIAL" => {
                    let mut versions: Vec<_> =
                        row.version.iter().map(|v| FirmwareVersion::Release(v.clone())).collect();
                    if row.latest == 1 {
                        versions.push(FirmwareVersion::Stable);
                    }
                    versions
                }
                "BETA" => vec![FirmwareVersion::Beta],
                "DEV" => vec![FirmwareVersion::Dev],
                other if other.starts_with(UPSTREAM_STABLE_PREFIX) => {
                    let release = row
                        .version
                        .clone()
                        .unwrap_or_else(|| other[UPSTREAM_STABLE_PREFIX.len()..].to_string());
                    if release.is_empty() {
                        Vec::new()
                    } else {
                        vec![FirmwareVersion::Release(release)]
                    }
                }
                _ => Vec::new(),
            };

            for version in versions {
                if seen.insert((vehicle, platform, version.clone())) {
                    entries.push(ManifestEntry {
                        vehicle,
                        platform,
                        version,
                        url: row.url.clone(),
                        format,
                        sha256: None,
                    });
                }
            }
        }

        log_debug!(
            MODULE,
            "Upstream manifest: {} usable entries, {} rows skipped",
            entries.len(),
            skipped
        );
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the row for a request.
    ///
    /// `Stable` falls back to the highest semver release when the manifest
    /// has no explicit stable row.
    pub fn resolve(
        &self,
        vehicle: Vehicle,
        platform: Platform,
        version: &FirmwareVersion,
    ) -> Result<&ManifestEntry> {
        let candidates = self
            .entries
            .iter()
            .filter(|e| e.vehicle == vehicle && e.platform == platform);

        let exact = candidates.clone().find(|e| &e.version == version);
        let found = match (exact, version) {
            (Some(entry), _) => Some(entry),
            (None, FirmwareVersion::Stable) => candidates
                .filter_map(|e| e.version.semver().map(|v| (v, e)))
                .max_by(|a, b| a.0.cmp(&b.0))
                .map(|(_, e)| e),
            (None, _) => None,
        };

        found.ok_or_else(|| Error::ManifestEntryNotFound {
            vehicle,
            platform,
            version: version.clone(),
        })
    }

    /// Versions resolvable for a vehicle/platform pair, channels first
    pub fn available_versions(&self, vehicle: Vehicle, platform: Platform) -> Vec<FirmwareVersion> {
        let mut versions: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.vehicle == vehicle && e.platform == platform)
            .map(|e| e.version.clone())
            .collect();
        versions.sort();
        versions.dedup();
        versions
    }
}

/// Lazily loaded, process-wide view of the manifest
pub struct FirmwareCatalog {
    url: String,
    transport: Arc<dyn Transport>,
    manifest: RwLock<Option<Arc<Manifest>>>,
}

impl FirmwareCatalog {
    pub fn new(url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            url: url.into(),
            transport,
            manifest: RwLock::new(None),
        }
    }

    /// Catalog over HTTP at the default manifest URL
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(
            config::urls::MANIFEST,
            Arc::new(HttpTransport::new()?),
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    async fn fetch_manifest(&self) -> Result<Arc<Manifest>> {
        log_info!(MODULE, "Fetching firmware manifest from {}", self.url);

        let body = self.transport.fetch(&self.url).await?.collect().await?;
        let manifest = Manifest::parse(&body).map_err(|e| {
            log_error!(MODULE, "Failed to parse manifest: {}", e);
            e
        })?;

        log_info!(MODULE, "Loaded {} manifest entries", manifest.len());
        Ok(Arc::new(manifest))
    }

    /// Fetch the manifest and replace the cached copy
    pub async fn load(&self) -> Result<Arc<Manifest>> {
        let manifest = self.fetch_manifest().await?;
        *self.manifest.write().await = Some(Arc::clone(&manifest));
        Ok(manifest)
    }

    /// The cached manifest, loading it on first use
    pub async fn manifest(&self) -> Result<Arc<Manifest>> {
        if let Some(manifest) = self.manifest.read().await.as_ref() {
            return Ok(Arc::clone(manifest));
        }

        let mut guard = self.manifest.write().await;
        // Another task may have loaded it while we waited for the write lock
        if let Some(manifest) = guard.as_ref() {
            return Ok(Arc::clone(manifest));
        }

        let manifest = self.fetch_manifest().await?;
        *guard = Some(Arc::clone(&manifest));
        Ok(manifest)
    }

    pub async fn resolve(
        &self,
        vehicle: Vehicle,
        platform: Platform,
        version: &FirmwareVersion,
    ) -> Result<ManifestEntry> {
        let manifest = self.manifest().await?;
        let entry = manifest.resolve(vehicle, platform, version)?;
        log_debug!(
            MODULE,
            "Resolved {} {} {} -> {} ({})",
            vehicle,
            platform,
            version,
            entry.url,
            entry.format
        );
        Ok(entry.clone())
    }

    pub async fn available_versions(
        &self,
        vehicle: Vehicle,
        platform: Platform,
    ) -> Result<Vec<FirmwareVersion>> {
        Ok(self.manifest().await?.available_versions(vehicle, platform))
    }
}
