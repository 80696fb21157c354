//! Device Manager Configuration
//!
//! Construction-time settings for both backends. Every field has a default,
//! so a YAML file only needs to name what it changes.

use crate::domain::ports::DeviceMode;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Name given to namespaces created for volume groups
pub const DEFAULT_NAMESPACE_TAG: &str = "pmem-csi";

// =============================================================================
// Clearing and Device Wait
// =============================================================================

/// How freshly allocated and released devices are wiped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClearConfig {
    /// Leading bytes zeroed on every clear
    pub span_bytes: u64,
    /// Refuse to write to paths that are not block devices
    pub require_block_device: bool,
}

impl Default for ClearConfig {
    fn default() -> Self {
        Self {
            // Covers the btrfs superblock at 64 KiB as well as ext4/xfs/GPT
            span_bytes: MIB,
            require_block_device: true,
        }
    }
}

/// Bounded polling for device nodes that appear after allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceWaitConfig {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for DeviceWaitConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval_ms: 1000,
        }
    }
}

impl DeviceWaitConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// =============================================================================
// Manager Configuration
// =============================================================================

/// Configuration of a device manager instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Which backend to build
    pub mode: DeviceMode,
    /// Share of each region's raw capacity provisioned into volume groups
    pub pmem_percentage: u32,
    /// Name identifying namespaces owned by the LVM backend
    pub namespace_tag: String,
    /// Extra bytes requested per direct-mode namespace for label metadata.
    /// `None` means one namespace alignment unit.
    pub namespace_overhead: Option<u64>,
    pub clear: ClearConfig,
    pub device_wait: DeviceWaitConfig,
    /// Mount table consulted for the writable /sys check
    pub mounts_path: PathBuf,
    /// Directory holding the namespace block device nodes
    pub dev_dir: PathBuf,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            mode: DeviceMode::Lvm,
            pmem_percentage: 100,
            namespace_tag: DEFAULT_NAMESPACE_TAG.to_string(),
            namespace_overhead: None,
            clear: ClearConfig::default(),
            device_wait: DeviceWaitConfig::default(),
            mounts_path: PathBuf::from("/proc/mounts"),
            dev_dir: PathBuf::from("/dev"),
        }
    }
}

impl ManagerConfig {
    /// Load from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| Error::Configuration(format!("invalid configuration: {}", e)))
    }

    /// Reject values no backend can operate with
    pub fn validate(&self) -> Result<()> {
        if self.pmem_percentage > 100 {
            return Err(Error::Configuration(format!(
                "invalid pmemPercentage '{}'. Value must be 0..100",
                self.pmem_percentage
            )));
        }
        if self.namespace_tag.is_empty() {
            return Err(Error::Configuration(
                "namespaceTag must not be empty".to_string(),
            ));
        }
        if self.clear.span_bytes == 0 {
            return Err(Error::Configuration(
                "clear.spanBytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Size Parsing
// =============================================================================

/// Parse a size such as `4096`, `512M`, `5Gi` or `1.5T` into bytes
///
/// `K`/`M`/`G`/`T` are decimal, the `Ki`/`Mi`/`Gi`/`Ti` forms are binary.
/// A trailing `B` is accepted.
pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    let s = s.strip_suffix(&['B', 'b'][..]).unwrap_or(s);
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let multiplier: u64 = match unit.trim() {
        "" => 1,
        "K" | "k" => 1000,
        "M" => 1000u64.pow(2),
        "G" => 1000u64.pow(3),
        "T" => 1000u64.pow(4),
        "Ki" => KIB,
        "Mi" => MIB,
        "Gi" => GIB,
        "Ti" => TIB,
        other => {
            return Err(Error::Configuration(format!(
                "unknown size unit '{}' in '{}'",
                other, input
            )))
        }
    };

    if number.contains('.') {
        let value: f64 = number
            .parse()
            .map_err(|_| Error::Configuration(format!("invalid size '{}'", input)))?;
        Ok((value * multiplier as f64).round() as u64)
    } else {
        let value: u64 = number
            .parse()
            .map_err(|_| Error::Configuration(format!("invalid size '{}'", input)))?;
        value
            .checked_mul(multiplier)
            .ok_or_else(|| Error::Configuration(format!("size '{}' overflows", input)))
    }
}
