//! Direct Namespace Backend
//!
//! Every volume is one fsdax namespace named after its volume id. The
//! hardware is authoritative, so nothing is cached: lookups re-read the
//! topology.

use crate::config::{ClearConfig, DeviceWaitConfig, ManagerConfig, GIB};
use crate::domain::ports::{
    Capacity, CreateNamespaceOpts, DeviceInfo, DeviceManager, DeviceMode, Namespace,
    NamespaceMode, RegionType, TopologyRef,
};
use crate::error::{Error, Result};
use crate::manager::align::{align_down, align_up, region_align};
use crate::manager::clear::{clear_device, wait_device_appears};
use crate::manager::sysfs::check_sysfs_writable;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Namespace alignment, before interleaving
pub const NDCTL_ALIGN: u64 = GIB;

/// Device manager creating one namespace per volume
pub struct DirectDeviceManager {
    topology: TopologyRef,
    namespace_tag: String,
    /// Added to each request for label and info-block metadata. Determined
    /// empirically, not derived from the namespace layout.
    overhead: u64,
    clear: ClearConfig,
    device_wait: DeviceWaitConfig,
    dev_dir: PathBuf,
    lock: Mutex<()>,
}

impl DirectDeviceManager {
    pub async fn new(config: &ManagerConfig, topology: TopologyRef) -> Result<Self> {
        config.validate()?;
        check_sysfs_writable(&config.mounts_path).await?;

        Ok(Self {
            topology,
            namespace_tag: config.namespace_tag.clone(),
            overhead: config.namespace_overhead.unwrap_or(NDCTL_ALIGN),
            clear: config.clear.clone(),
            device_wait: config.device_wait.clone(),
            dev_dir: config.dev_dir.clone(),
            lock: Mutex::new(()),
        })
    }

    /// Namespaces that represent volumes of this backend
    fn is_volume(&self, ns: &Namespace) -> bool {
        ns.active && !ns.name.is_empty() && ns.name != self.namespace_tag
    }

    async fn find_volume(&self, volume_id: &str) -> Result<Namespace> {
        if volume_id == self.namespace_tag {
            return Err(Error::not_found(volume_id));
        }
        self.topology.namespace_by_name(volume_id).await
    }

    /// Resolve, wait for and clear a namespace that was just created
    async fn prepare_namespace(&self, ns: &Namespace) -> Result<DeviceInfo> {
        if ns.blockdev.is_none() {
            return Err(Error::not_found(format!("block device of {}", ns.dev)));
        }
        let device = ns.to_device_info(&self.dev_dir);
        wait_device_appears(&device.path, &self.device_wait).await?;
        clear_device(&device, false, &self.clear).await?;
        Ok(device)
    }
}

#[async_trait]
impl DeviceManager for DirectDeviceManager {
    fn mode(&self) -> DeviceMode {
        DeviceMode::Direct
    }

    async fn capacity(&self) -> Result<Capacity> {
        let _guard = self.lock.lock().await;
        let buses = self.topology.buses().await?;

        let mut capacity = Capacity::default();
        for bus in &buses {
            for region in &bus.regions {
                capacity.total += region.size;
                if !region.enabled {
                    continue;
                }
                let realign = region_align(NDCTL_ALIGN, region.interleave_ways);
                let available = align_down(region.max_available_extent, realign);
                capacity.managed += region.size;
                capacity.available += available;
                capacity.max_volume_size = capacity.max_volume_size.max(available);
            }
        }

        debug!("Direct capacity: {:?}", capacity);
        Ok(capacity)
    }

    async fn create_device(&self, volume_id: &str, size: u64) -> Result<()> {
        let _guard = self.lock.lock().await;

        // The pool tag is never listed as a volume, so it could not be deleted
        if volume_id == self.namespace_tag {
            return Err(Error::Configuration(format!(
                "volume id {:?} is reserved for pool namespaces",
                volume_id
            )));
        }

        match self.topology.namespace_by_name(volume_id).await {
            Ok(_) => {
                return Err(Error::DeviceExists {
                    volume_id: volume_id.to_string(),
                })
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let buses = self.topology.buses().await?;
        let candidates = buses
            .iter()
            .flat_map(|bus| bus.active_regions())
            .filter(|r| r.region_type == RegionType::Pmem);

        for region in candidates {
            let realign = region_align(NDCTL_ALIGN, region.interleave_ways);
            let request = align_up(size.saturating_add(self.overhead), realign);
            if request > region.max_available_extent {
                debug!(
                    "Region {} cannot hold {} bytes (max extent {})",
                    region.dev, request, region.max_available_extent
                );
                continue;
            }

            let opts = CreateNamespaceOpts {
                region: region.dev.clone(),
                name: volume_id.to_string(),
                size: request,
                align: NDCTL_ALIGN,
                mode: NamespaceMode::Fsdax,
            };
            let ns = match self.topology.create_namespace(&opts).await {
                Ok(ns) => ns,
                Err(e) => {
                    warn!("Namespace creation in {} failed: {}", region.dev, e);
                    continue;
                }
            };

            return match self.prepare_namespace(&ns).await {
                Ok(device) => {
                    info!(
                        "Created namespace {} for {} ({} bytes) in {}",
                        ns.dev, volume_id, device.size, region.dev
                    );
                    Ok(())
                }
                Err(e) => {
                    if let Err(undo) = self.topology.destroy_namespace(volume_id).await {
                        warn!("Rollback of namespace {} failed: {}", ns.dev, undo);
                    }
                    Err(e)
                }
            };
        }

        Err(Error::InsufficientSpace { requested: size })
    }

    async fn delete_device(&self, volume_id: &str, flush: bool) -> Result<()> {
        let _guard = self.lock.lock().await;

        let ns = match self.find_volume(volume_id).await {
            Ok(ns) => ns,
            Err(e) if e.is_not_found() => {
                debug!("Delete of unknown volume {}, nothing to do", volume_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if ns.blockdev.is_some() {
            let device = ns.to_device_info(&self.dev_dir);
            match clear_device(&device, flush, &self.clear).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!("Device node of {} already gone", volume_id);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        match self.topology.destroy_namespace(volume_id).await {
            Ok(()) => {
                info!("Deleted namespace {} for {}", ns.dev, volume_id);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_device(&self, volume_id: &str) -> Result<DeviceInfo> {
        let _guard = self.lock.lock().await;
        let ns = self.find_volume(volume_id).await?;
        Ok(ns.to_device_info(&self.dev_dir))
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let _guard = self.lock.lock().await;
        let buses = self.topology.buses().await?;

        let mut devices: Vec<DeviceInfo> = buses
            .iter()
            .flat_map(|bus| bus.regions.iter())
            .flat_map(|region| region.namespaces.iter())
            .filter(|ns| self.is_volume(ns))
            .map(|ns| ns.to_device_info(&self.dev_dir))
            .collect();
        devices.sort_by(|a, b| a.volume_id.cmp(&b.volume_id));
        Ok(devices)
    }
}
