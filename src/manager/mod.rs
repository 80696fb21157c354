//! Device Manager Backends
//!
//! Provides the two implementations of [`DeviceManager`]:
//! - LVM: logical volumes in pre-provisioned PMEM volume groups
//! - Direct: one PMEM namespace per volume
//!
//! plus the clearing and alignment helpers they share.

pub mod align;
pub mod clear;
pub mod direct;
pub mod lvm;
pub mod sysfs;

pub use direct::DirectDeviceManager;
pub use lvm::LvmDeviceManager;

use crate::config::ManagerConfig;
use crate::domain::ports::{CommandRunnerRef, DeviceManagerRef, DeviceMode, TopologyRef};
use crate::error::Result;
use crate::exec::SystemRunner;
use crate::ndctl::NdctlTopology;
use std::sync::Arc;
use tracing::info;

/// Factory for creating the configured backend
pub struct DeviceManagerFactory;

impl DeviceManagerFactory {
    /// Create a backend driving the host's LVM and ndctl tools
    pub async fn create(config: &ManagerConfig) -> Result<DeviceManagerRef> {
        let runner: CommandRunnerRef = Arc::new(SystemRunner::new());
        let topology: TopologyRef = Arc::new(NdctlTopology::new(runner.clone()));
        Self::with_ports(config, runner, topology).await
    }

    /// Create a backend on top of the given tool ports
    pub async fn with_ports(
        config: &ManagerConfig,
        runner: CommandRunnerRef,
        topology: TopologyRef,
    ) -> Result<DeviceManagerRef> {
        config.validate()?;
        info!("Initializing {} device manager", config.mode);

        let manager: DeviceManagerRef = match config.mode {
            DeviceMode::Lvm => Arc::new(LvmDeviceManager::new(config, runner, topology).await?),
            DeviceMode::Direct => Arc::new(DirectDeviceManager::new(config, topology).await?),
        };
        Ok(manager)
    }
}
