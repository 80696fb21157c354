//! LVM Pool Backend
//!
//! Pre-provisions PMEM namespaces into one volume group per region and
//! allocates logical volumes out of them. Volume state lives in LVM; the
//! backend keeps a cache of known volumes that is rebuilt from `lvs` at
//! construction.

pub mod parse;
pub mod setup;

pub use parse::{parse_lvs_output, parse_vgs_output};
pub use setup::{pool_name, usable_namespace_size};

use crate::config::{ClearConfig, DeviceWaitConfig, ManagerConfig, MIB};
use crate::domain::ports::{
    Capacity, CommandRunner, CommandRunnerRef, DeviceInfo, DeviceManager, DeviceMode, PoolInfo,
    TopologyRef,
};
use crate::error::{Error, Result};
use crate::manager::align::align_up;
use crate::manager::clear::{clear_device, wait_device_appears};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Granularity of logical volume sizes, the default LVM extent size
pub const LVM_ALIGN: u64 = 4 * MIB;

#[derive(Debug, Default)]
struct LvmState {
    /// Managed volume groups, in provisioning order
    pools: Vec<String>,
    /// Known volumes keyed by volume id
    devices: HashMap<String, DeviceInfo>,
}

/// Device manager allocating logical volumes from PMEM volume groups
pub struct LvmDeviceManager {
    runner: CommandRunnerRef,
    topology: TopologyRef,
    clear: ClearConfig,
    device_wait: DeviceWaitConfig,
    /// Held for the full duration of every operation
    state: Mutex<LvmState>,
}

impl LvmDeviceManager {
    /// Provision volume groups on all suitable regions and load existing
    /// volumes
    pub async fn new(
        config: &ManagerConfig,
        runner: CommandRunnerRef,
        topology: TopologyRef,
    ) -> Result<Self> {
        config.validate()?;
        let pools = setup::provision(
            runner.as_ref(),
            topology.as_ref(),
            config.pmem_percentage,
            &config.namespace_tag,
            &config.dev_dir,
        )
        .await?;
        info!("LVM backend managing volume groups {:?}", pools);
        Self::for_pools(config, runner, topology, pools).await
    }

    /// Use already provisioned volume groups
    pub async fn for_pools(
        config: &ManagerConfig,
        runner: CommandRunnerRef,
        topology: TopologyRef,
        pools: Vec<String>,
    ) -> Result<Self> {
        config.validate()?;
        let devices = list_volumes(runner.as_ref(), &pools).await?;
        debug!("Found {} existing logical volume(s)", devices.len());

        Ok(Self {
            runner,
            topology,
            clear: config.clear.clone(),
            device_wait: config.device_wait.clone(),
            state: Mutex::new(LvmState { pools, devices }),
        })
    }

    /// Names of the managed volume groups
    pub async fn pools(&self) -> Vec<String> {
        self.state.lock().await.pools.clone()
    }

    /// Reload the volume cache from `lvs`
    pub async fn refresh(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.devices = list_volumes(self.runner.as_ref(), &state.pools).await?;
        Ok(())
    }

    async fn pool_inventory(&self, pools: &[String]) -> Result<Vec<PoolInfo>> {
        if pools.is_empty() {
            return Ok(Vec::new());
        }
        let mut args: Vec<&str> = parse::VGS_ARGS.to_vec();
        args.extend(pools.iter().map(String::as_str));
        let output = self.runner.run("vgs", &args).await?;
        parse_vgs_output(&output, pools)
    }

    /// Resolve, wait for and clear a volume that was just created in `pool`
    async fn prepare_volume(&self, volume_id: &str, pool: &str) -> Result<DeviceInfo> {
        let mut devices = list_volumes(self.runner.as_ref(), &[pool.to_string()]).await?;
        let device = devices
            .remove(volume_id)
            .ok_or_else(|| Error::not_found(volume_id))?;
        wait_device_appears(&device.path, &self.device_wait).await?;
        clear_device(&device, false, &self.clear).await?;
        Ok(device)
    }
}

async fn list_volumes(
    runner: &dyn CommandRunner,
    pools: &[String],
) -> Result<HashMap<String, DeviceInfo>> {
    if pools.is_empty() {
        return Ok(HashMap::new());
    }
    let mut args: Vec<&str> = parse::LVS_ARGS.to_vec();
    args.extend(pools.iter().map(String::as_str));
    let output = runner.run("lvs", &args).await?;
    Ok(parse_lvs_output(&output))
}

#[async_trait]
impl DeviceManager for LvmDeviceManager {
    fn mode(&self) -> DeviceMode {
        DeviceMode::Lvm
    }

    async fn capacity(&self) -> Result<Capacity> {
        let state = self.state.lock().await;
        let pools = self.pool_inventory(&state.pools).await?;

        let mut capacity = Capacity {
            total: self.topology.total_size().await?,
            ..Default::default()
        };
        for pool in &pools {
            capacity.managed += pool.size;
            capacity.available += pool.free;
            capacity.max_volume_size = capacity.max_volume_size.max(pool.free);
        }

        debug!("LVM capacity: {:?}", capacity);
        Ok(capacity)
    }

    async fn create_device(&self, volume_id: &str, size: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.devices.contains_key(volume_id) {
            return Err(Error::DeviceExists {
                volume_id: volume_id.to_string(),
            });
        }

        let pools = self.pool_inventory(&state.pools).await?;
        let aligned = align_up(size, LVM_ALIGN);
        if aligned != size {
            debug!("Rounded {} up to {} bytes", size, aligned);
        }
        let size_arg = format!("{}B", aligned);

        for pool in pools.iter().filter(|p| p.free >= aligned) {
            // -Zn: clearing is done by us once the node exists
            if let Err(e) = self
                .runner
                .run(
                    "lvcreate",
                    &["-Zn", "-L", &size_arg, "-n", volume_id, &pool.name],
                )
                .await
            {
                warn!("lvcreate in {} failed, trying next pool: {}", pool.name, e);
                continue;
            }

            return match self.prepare_volume(volume_id, &pool.name).await {
                Ok(device) => {
                    info!(
                        "Created logical volume {} ({} bytes) in {}",
                        volume_id, device.size, pool.name
                    );
                    state.devices.insert(volume_id.to_string(), device);
                    Ok(())
                }
                Err(e) => {
                    let target = format!("{}/{}", pool.name, volume_id);
                    if let Err(undo) = self.runner.run("lvremove", &["-fy", &target]).await {
                        warn!("Rollback of {} failed: {}", target, undo);
                    }
                    Err(e)
                }
            };
        }

        Err(Error::InsufficientSpace { requested: size })
    }

    async fn delete_device(&self, volume_id: &str, flush: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(device) = state.devices.get(volume_id).cloned() else {
            debug!("Delete of unknown volume {}, nothing to do", volume_id);
            return Ok(());
        };

        match clear_device(&device, flush, &self.clear).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Device node of {} already gone", volume_id);
                state.devices.remove(volume_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.runner.run("lvremove", &["-fy", &device.path]).await?;
        state.devices.remove(volume_id);
        info!("Deleted logical volume {}", volume_id);
        Ok(())
    }

    async fn get_device(&self, volume_id: &str) -> Result<DeviceInfo> {
        let state = self.state.lock().await;
        state
            .devices
            .get(volume_id)
            .cloned()
            .ok_or_else(|| Error::not_found(volume_id))
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let state = self.state.lock().await;
        let mut devices: Vec<DeviceInfo> = state.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.volume_id.cmp(&b.volume_id));
        Ok(devices)
    }
}
