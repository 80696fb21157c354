//! PMEM Device Manager
//!
//! Turns persistent-memory regions into sized block devices for a CSI
//! driver. Two backends satisfy one [`DeviceManager`] contract:
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                  DeviceManager (domain::ports)                   │
//! │        capacity · create · delete · get · list  (serialized)     │
//! ├────────────────────────────────┬─────────────────────────────────┤
//! │      LvmDeviceManager          │      DirectDeviceManager        │
//! │  volume group per region,      │  one fsdax namespace per        │
//! │  logical volume per device     │  device                         │
//! ├────────────────────────────────┴─────────────────────────────────┤
//! │        clear · align · sysfs check · device-node wait            │
//! ├────────────────────────────────┬─────────────────────────────────┤
//! │   CommandRunner (exec)         │   Topology (ndctl)              │
//! │   vgs · lvs · lvcreate · ...   │   buses · regions · namespaces  │
//! └────────────────────────────────┴─────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`manager`]: Both backends, clearing and alignment helpers
//! - [`ndctl`]: PMEM topology reader on top of `ndctl`
//! - [`exec`]: External command execution
//! - [`metrics`]: Prometheus instrumentation
//! - [`config`]: Construction-time configuration
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod config;
pub mod domain;
pub mod error;
pub mod exec;
pub mod manager;
pub mod metrics;
pub mod ndctl;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{parse_size, ClearConfig, DeviceWaitConfig, ManagerConfig};

pub use domain::ports::{
    Bus, Capacity, CommandRunner, CommandRunnerRef, CreateNamespaceOpts, DeviceInfo,
    DeviceManager, DeviceManagerRef, DeviceMode, Namespace, NamespaceMode, PoolInfo, Region,
    RegionType, Topology, TopologyRef,
};

pub use error::{Error, Result};

pub use exec::SystemRunner;

pub use manager::{DeviceManagerFactory, DirectDeviceManager, LvmDeviceManager};

pub use metrics::MeteredDeviceManager;

pub use ndctl::NdctlTopology;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
