//! Volume Group Provisioning
//!
//! Runs once when the LVM backend is built: carves a tagged fsdax namespace
//! out of every suitable region and gathers the tagged namespaces of each
//! region into one volume group.

use crate::config::GIB;
use crate::domain::ports::{
    Bus, CommandRunner, CreateNamespaceOpts, Namespace, NamespaceMode, Region, RegionType,
    Topology,
};
use crate::error::Result;
use crate::manager::align::{align_down, region_align};
use std::path::Path;
use tracing::{debug, info};

/// Alignment requested for pool namespaces
pub const NAMESPACE_ALIGN: u64 = GIB;

/// Namespace creation below this size fails in practice
pub const MIN_NAMESPACE_SIZE: u64 = 2 * GIB;

/// Volume group name for a region, e.g. `ndbus0region0fsdax`
pub fn pool_name(bus: &Bus, region: &Region) -> String {
    format!("{}{}fsdax", bus.dev, region.dev)
}

/// Size of the namespace to create in `region`, or 0 if none should be
///
/// Capacity already held by tagged namespaces from earlier runs counts
/// against the percentage.
pub fn usable_namespace_size(region: &Region, percentage: u32, tag: &str) -> u64 {
    let realign = region_align(NAMESPACE_ALIGN, region.interleave_ways);
    let mut can_use = (region.size as u128 * percentage as u128 / 100) as u64;
    debug!(
        "Region {}: total {} avail {} max extent {} can use {} ({}%), real align {}",
        region.dev,
        region.size,
        region.available_size,
        region.max_available_extent,
        can_use,
        percentage,
        realign
    );

    for ns in region.active_namespaces().filter(|ns| ns.name == tag) {
        debug!("Region {}: existing {} holds {} bytes", region.dev, ns.dev, ns.size);
        can_use = can_use.saturating_sub(ns.size);
    }

    // Alignment overhead makes available_size optimistic, and fragmentation
    // can leave the largest extent below it.
    can_use = can_use
        .min(region.available_size)
        .min(region.max_available_extent);
    let can_use = align_down(can_use, realign);

    if can_use < MIN_NAMESPACE_SIZE {
        0
    } else {
        can_use
    }
}

/// Create the tagged namespace for `region` if there is room for one
pub(crate) async fn setup_namespace(
    topology: &dyn Topology,
    region: &Region,
    percentage: u32,
    tag: &str,
) -> Result<Option<Namespace>> {
    let size = usable_namespace_size(region, percentage, tag);
    if size == 0 {
        debug!("Region {}: nothing left to provision", region.dev);
        return Ok(None);
    }

    info!("Creating {}-byte fsdax namespace in {}", size, region.dev);
    let ns = topology
        .create_namespace(&CreateNamespaceOpts {
            region: region.dev.clone(),
            name: tag.to_string(),
            size,
            align: NAMESPACE_ALIGN,
            mode: NamespaceMode::Fsdax,
        })
        .await?;
    Ok(Some(ns))
}

/// Ensure every tagged namespace among `namespaces` belongs to `vg_name`
pub(crate) async fn setup_volume_group(
    runner: &dyn CommandRunner,
    namespaces: &[Namespace],
    vg_name: &str,
    tag: &str,
    dev_dir: &Path,
) -> Result<()> {
    let mut unassigned = Vec::new();
    for ns in namespaces.iter().filter(|ns| ns.active && ns.name == tag) {
        let Some(dev) = ns.device_path(dev_dir) else {
            continue;
        };
        // A physical volume already in a group prints its group name
        match runner
            .run("pvs", &["--noheadings", "-o", "vg_name", &dev])
            .await
        {
            Ok(out) if !out.trim().is_empty() => {
                debug!("{} already belongs to {}", dev, out.trim());
            }
            _ => unassigned.push(dev),
        }
    }

    if unassigned.is_empty() {
        debug!("No new namespace to add to volume group {}", vg_name);
        return Ok(());
    }

    let cmd = if runner.run("vgdisplay", &[vg_name]).await.is_ok() {
        "vgextend"
    } else {
        "vgcreate"
    };

    let mut args = vec!["--force", vg_name];
    args.extend(unassigned.iter().map(String::as_str));
    runner.run(cmd, &args).await?;
    info!("{} {} with {:?}", cmd, vg_name, unassigned);

    Ok(())
}

/// Provision all suitable regions and return the volume groups that exist
pub(crate) async fn provision(
    runner: &dyn CommandRunner,
    topology: &dyn Topology,
    percentage: u32,
    tag: &str,
    dev_dir: &Path,
) -> Result<Vec<String>> {
    let mut pools = Vec::new();

    for bus in topology.buses().await? {
        for region in bus.active_regions() {
            if region.region_type != RegionType::Pmem {
                info!(
                    "Region is not suitable for fsdax, skipping it: {} on {}",
                    region.dev, bus.dev
                );
                continue;
            }

            let vg_name = pool_name(&bus, region);
            let mut namespaces: Vec<Namespace> = region.active_namespaces().cloned().collect();
            namespaces.extend(setup_namespace(topology, region, percentage, tag).await?);
            setup_volume_group(runner, &namespaces, &vg_name, tag, dev_dir).await?;

            if runner.run("vgs", &[&vg_name]).await.is_ok() {
                pools.push(vg_name);
            } else {
                debug!("Volume group {} does not exist, skipping", vg_name);
            }
        }
    }

    Ok(pools)
}
