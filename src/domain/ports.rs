//! Domain Ports - Core trait definitions for the device manager
//!
//! These traits define the boundaries between the allocation engine and
//! the outside world: the caller-facing [`DeviceManager`] contract, and the
//! two external subsystems the backends drive, the [`CommandRunner`] and
//! the PMEM [`Topology`] reader.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

// =============================================================================
// Device Mode
// =============================================================================

/// Backend selected at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Logical volumes carved out of pre-provisioned volume groups
    #[default]
    Lvm,
    /// One PMEM namespace per volume
    Direct,
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceMode::Lvm => write!(f, "lvm"),
            DeviceMode::Direct => write!(f, "direct"),
        }
    }
}

impl FromStr for DeviceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lvm" => Ok(DeviceMode::Lvm),
            "direct" | "ndctl" => Ok(DeviceMode::Direct),
            other => Err(Error::Configuration(format!(
                "unknown device mode '{}', expected 'lvm' or 'direct'",
                other
            ))),
        }
    }
}

// =============================================================================
// Device and Capacity Types
// =============================================================================

/// An allocated, addressable block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Caller-chosen unique key
    pub volume_id: String,
    /// Device node (e.g., /dev/ndbus0region0fsdax/pvc-1)
    pub path: String,
    /// Provisioned size in bytes, never below the requested size
    pub size: u64,
}

/// Capacity snapshot, recomputed on every query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    /// All PMEM capacity on the node, regardless of mode or ownership
    pub total: u64,
    /// Capacity under this backend's control
    pub managed: u64,
    /// Immediately allocatable capacity
    pub available: u64,
    /// Largest single volume that could be created right now
    pub max_volume_size: u64,
}

/// Volume group inventory row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolInfo {
    pub name: String,
    pub size: u64,
    pub free: u64,
}

// =============================================================================
// PMEM Topology Types
// =============================================================================

/// Region type as reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionType {
    Pmem,
    Blk,
    #[serde(other)]
    Unknown,
}

/// Namespace personality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceMode {
    Fsdax,
    Devdax,
    Sector,
    Raw,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for NamespaceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceMode::Fsdax => write!(f, "fsdax"),
            NamespaceMode::Devdax => write!(f, "devdax"),
            NamespaceMode::Sector => write!(f, "sector"),
            NamespaceMode::Raw => write!(f, "raw"),
            NamespaceMode::Unknown => write!(f, "unknown"),
        }
    }
}

/// A carved-out namespace inside a region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Kernel device name (e.g., namespace0.0)
    pub dev: String,
    /// User-assigned name, empty if none
    pub name: String,
    pub size: u64,
    pub mode: NamespaceMode,
    /// Block device name (e.g., pmem0), absent for devdax
    pub blockdev: Option<String>,
    pub active: bool,
}

impl Namespace {
    /// Path of the block device node below `dev_dir`, if the namespace
    /// exposes one
    pub fn device_path(&self, dev_dir: &Path) -> Option<String> {
        self.blockdev
            .as_ref()
            .map(|b| dev_dir.join(b).to_string_lossy().to_string())
    }

    pub fn to_device_info(&self, dev_dir: &Path) -> DeviceInfo {
        DeviceInfo {
            volume_id: self.name.clone(),
            path: self.device_path(dev_dir).unwrap_or_default(),
            size: self.size,
        }
    }
}

/// A contiguous span of PMEM capacity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Kernel device name (e.g., region0)
    pub dev: String,
    pub size: u64,
    pub available_size: u64,
    /// Largest contiguous free extent, may be below `available_size`
    pub max_available_extent: u64,
    /// Number of interleaved modules, at least 1
    pub interleave_ways: u64,
    pub enabled: bool,
    pub region_type: RegionType,
    pub namespaces: Vec<Namespace>,
}

impl Region {
    pub fn active_namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter().filter(|ns| ns.active)
    }
}

/// A PMEM bus and its regions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bus {
    /// Kernel device name (e.g., ndbus0)
    pub dev: String,
    pub provider: String,
    pub regions: Vec<Region>,
}

impl Bus {
    pub fn active_regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(|r| r.enabled)
    }
}

/// Parameters for carving a namespace out of a region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNamespaceOpts {
    pub region: String,
    pub name: String,
    pub size: u64,
    pub align: u64,
    pub mode: NamespaceMode,
}

// =============================================================================
// Device Manager Port
// =============================================================================

/// Uniform contract satisfied by both backends
///
/// Every call is serialized per instance; the external tools behind the
/// backends are not safe for concurrent invocation.
#[async_trait]
pub trait DeviceManager: Send + Sync {
    /// Backend kind, no I/O
    fn mode(&self) -> DeviceMode;

    /// Compute capacity from fresh tool output
    async fn capacity(&self) -> Result<Capacity>;

    /// Allocate a device of at least `size` bytes
    async fn create_device(&self, volume_id: &str, size: u64) -> Result<()>;

    /// Clear and release a device; unknown ids succeed
    async fn delete_device(&self, volume_id: &str, flush: bool) -> Result<()>;

    /// Look up a device, failing with `DeviceNotFound` if absent
    async fn get_device(&self, volume_id: &str) -> Result<DeviceInfo>;

    /// All devices owned by this backend
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>>;
}

// =============================================================================
// Command Runner Port
// =============================================================================

/// Executes external storage-management programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning stdout on success
    ///
    /// A non-zero exit maps to `Error::ToolFailure` carrying the exit
    /// status and stderr.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String>;
}

// =============================================================================
// Topology Port
// =============================================================================

/// Read/modify view of the PMEM hardware
#[async_trait]
pub trait Topology: Send + Sync {
    /// Enumerate buses with all their regions and namespaces
    async fn buses(&self) -> Result<Vec<Bus>>;

    /// Create a namespace in the given region
    async fn create_namespace(&self, opts: &CreateNamespaceOpts) -> Result<Namespace>;

    /// Destroy the active namespace carrying `name`
    async fn destroy_namespace(&self, name: &str) -> Result<()>;

    /// Find the active namespace carrying `name`
    async fn namespace_by_name(&self, name: &str) -> Result<Namespace> {
        self.buses()
            .await?
            .into_iter()
            .flat_map(|bus| bus.regions)
            .flat_map(|region| region.namespaces)
            .find(|ns| ns.active && ns.name == name)
            .ok_or_else(|| Error::not_found(name))
    }

    /// Sum of all region sizes, regardless of state and type
    async fn total_size(&self) -> Result<u64> {
        Ok(self
            .buses()
            .await?
            .iter()
            .flat_map(|bus| bus.regions.iter())
            .map(|region| region.size)
            .sum())
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type DeviceManagerRef = Arc<dyn DeviceManager>;
pub type CommandRunnerRef = Arc<dyn CommandRunner>;
pub type TopologyRef = Arc<dyn Topology>;
