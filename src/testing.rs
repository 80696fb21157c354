//! Test doubles for the external tools
//!
//! `ScriptedRunner` answers commands from canned output, `FakeLvm` keeps
//! volume groups and logical volumes in memory and `FakeTopology` models
//! PMEM buses, regions and namespaces. Both fakes back their devices with
//! sparse files in a temporary directory so clearing can be observed.

use crate::domain::ports::{
    Bus, CommandRunner, CreateNamespaceOpts, Namespace, NamespaceMode, Region, RegionType,
    Topology,
};
use crate::error::{Error, Result};
use crate::manager::lvm::parse::{LVS_ARGS, VGS_ARGS};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Byte pattern fake devices are filled with before clearing
pub(crate) const GARBAGE: u8 = 0xA5;
const GARBAGE_PREFIX: usize = 64 * 1024;

fn tool_error(command: &str, status: i32, stderr: impl Into<String>) -> Error {
    Error::ToolFailure {
        command: command.to_string(),
        status: Some(status),
        stderr: stderr.into(),
    }
}

/// Create a sparse file of `size` bytes starting with garbage
pub(crate) fn garbage_file(path: &Path, size: u64) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&[GARBAGE; GARBAGE_PREFIX]).unwrap();
    file.set_len(size.max(GARBAGE_PREFIX as u64)).unwrap();
}

/// Read the first `len` bytes of a fake device
pub(crate) fn head(path: &str, len: usize) -> Vec<u8> {
    let data = std::fs::read(path).unwrap();
    data[..len.min(data.len())].to_vec()
}

// =============================================================================
// Scripted Runner
// =============================================================================

type Reply = std::result::Result<String, (i32, String)>;

/// Command runner replaying canned replies keyed by command-line prefix
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    replies: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, prefix: &str, output: &str) {
        self.replies
            .lock()
            .push((prefix.to_string(), Ok(output.to_string())));
    }

    pub(crate) fn fail(&self, prefix: &str, status: i32, stderr: &str) {
        self.replies
            .lock()
            .push((prefix.to_string(), Err((status, stderr.to_string()))));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().push(line.clone());

        // Later replies override earlier ones
        let reply = self
            .replies
            .lock()
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Ok(out)) => Ok(out),
            Some(Err((status, stderr))) => Err(tool_error(program, status, stderr)),
            None => Err(tool_error(program, 127, format!("unexpected command: {}", line))),
        }
    }
}

// =============================================================================
// Fake LVM
// =============================================================================

#[derive(Default)]
struct FakeGroup {
    size: u64,
    volumes: BTreeMap<String, u64>,
}

impl FakeGroup {
    fn free(&self) -> u64 {
        self.size - self.volumes.values().sum::<u64>()
    }
}

#[derive(Default)]
struct LvmWorld {
    groups: BTreeMap<String, FakeGroup>,
    /// Physical volume path to owning group
    pvs: HashMap<String, String>,
    failing: HashSet<String>,
    calls: Vec<String>,
}

/// In-memory LVM answering `vgs`, `lvs`, `lvcreate`, `lvremove`, `pvs`,
/// `vgdisplay`, `vgcreate` and `vgextend`
pub(crate) struct FakeLvm {
    dir: TempDir,
    world: Mutex<LvmWorld>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeLvm {
    pub(crate) fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            world: Mutex::new(LvmWorld::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Add a volume group of `size` bytes
    pub(crate) fn with_group(self, name: &str, size: u64) -> Self {
        self.world.lock().groups.insert(
            name.to_string(),
            FakeGroup {
                size,
                ..Default::default()
            },
        );
        self
    }

    /// Make `lvcreate` fail in `group` regardless of free space
    pub(crate) fn fail_creates_in(&self, group: &str) {
        self.world.lock().failing.insert(group.to_string());
    }

    pub(crate) fn volume_path(&self, group: &str, volume: &str) -> PathBuf {
        self.dir.path().join(group).join(volume)
    }

    /// Delete the device node of a volume behind the backend's back
    pub(crate) fn remove_device_node(&self, group: &str, volume: &str) {
        std::fs::remove_file(self.volume_path(group, volume)).unwrap();
    }

    pub(crate) fn volumes(&self, group: &str) -> Vec<String> {
        self.world
            .lock()
            .groups
            .get(group)
            .map(|g| g.volumes.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn group_size(&self, group: &str) -> Option<u64> {
        self.world.lock().groups.get(group).map(|g| g.size)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.world.lock().calls.clone()
    }

    /// Highest number of tool invocations observed running at once
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn execute(&self, program: &str, args: &[&str]) -> Result<String> {
        let mut world = self.world.lock();
        match program {
            "vgs" if args.starts_with(&VGS_ARGS) => {
                let mut out = String::new();
                for name in &args[VGS_ARGS.len()..] {
                    let group = world.groups.get(*name).ok_or_else(|| {
                        tool_error(program, 5, format!("Volume group \"{}\" not found", name))
                    })?;
                    out.push_str(&format!("  {} {} {}\n", name, group.size, group.free()));
                }
                Ok(out)
            }
            "vgs" | "vgdisplay" => {
                let name = args.last().copied().unwrap_or_default();
                if world.groups.contains_key(name) {
                    Ok(format!("  {} 1 0 0 wz--n- 0 0\n", name))
                } else {
                    Err(tool_error(
                        program,
                        5,
                        format!("Volume group \"{}\" not found", name),
                    ))
                }
            }
            "lvs" if args.starts_with(&LVS_ARGS) => {
                let mut out = String::new();
                for name in &args[LVS_ARGS.len()..] {
                    let group = world.groups.get(*name).ok_or_else(|| {
                        tool_error(program, 5, format!("Volume group \"{}\" not found", name))
                    })?;
                    for (lv, size) in &group.volumes {
                        let path = self.volume_path(name, lv);
                        out.push_str(&format!("  {} {} {}\n", lv, path.display(), size));
                    }
                }
                Ok(out)
            }
            "lvcreate" => {
                // lvcreate -Zn -L <size>B -n <name> <group>
                let size: u64 = args[2]
                    .trim_end_matches('B')
                    .parse()
                    .map_err(|_| tool_error(program, 3, "invalid size"))?;
                let (name, group_name) = (args[4], args[5]);
                if world.failing.contains(group_name) {
                    return Err(tool_error(program, 5, "device-mapper: reload ioctl failed"));
                }
                let group = world
                    .groups
                    .get_mut(group_name)
                    .ok_or_else(|| tool_error(program, 5, "Volume group not found"))?;
                if group.volumes.contains_key(name) {
                    return Err(tool_error(program, 5, "Logical volume already exists"));
                }
                if group.free() < size {
                    return Err(tool_error(program, 5, "insufficient free space"));
                }
                group.volumes.insert(name.to_string(), size);
                garbage_file(&self.volume_path(group_name, name), size);
                Ok(format!("  Logical volume \"{}\" created.\n", name))
            }
            "lvremove" => {
                // Accepts both /dev-style paths and group/volume
                let target = args.last().copied().unwrap_or_default();
                let mut parts = target.rsplit('/');
                let (lv, vg) = (
                    parts.next().unwrap_or_default(),
                    parts.next().unwrap_or_default(),
                );
                let group = world
                    .groups
                    .get_mut(vg)
                    .ok_or_else(|| tool_error(program, 5, "Volume group not found"))?;
                if group.volumes.remove(lv).is_none() {
                    return Err(tool_error(program, 5, "Failed to find logical volume"));
                }
                let _ = std::fs::remove_file(self.volume_path(vg, lv));
                Ok(format!("  Logical volume \"{}\" successfully removed\n", lv))
            }
            "pvs" => {
                let dev = args.last().copied().unwrap_or_default();
                match world.pvs.get(dev) {
                    Some(vg) => Ok(format!("  {}\n", vg)),
                    None => Err(tool_error(
                        program,
                        5,
                        format!("Failed to find physical volume \"{}\"", dev),
                    )),
                }
            }
            "vgcreate" | "vgextend" => {
                // vg{create,extend} --force <group> <dev>...
                let name = args[1].to_string();
                let devices = &args[2..];
                let added: u64 = devices
                    .iter()
                    .map(|d| std::fs::metadata(d).map(|m| m.len()).unwrap_or(0))
                    .sum();
                let exists = world.groups.contains_key(&name);
                if exists != (program == "vgextend") {
                    return Err(tool_error(program, 5, "unexpected group state"));
                }
                world.groups.entry(name.clone()).or_default().size += added;
                for dev in devices {
                    world.pvs.insert(dev.to_string(), name.clone());
                }
                Ok(String::new())
            }
            _ => Err(tool_error(program, 127, "command not found")),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeLvm {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        self.world
            .lock()
            .calls
            .push(format!("{} {}", program, args.join(" ")));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Give concurrent callers a chance to interleave
        tokio::task::yield_now().await;
        let result = self.execute(program, args);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// =============================================================================
// Fake Topology
// =============================================================================

/// An enabled pmem region with all of `size` free in one extent
pub(crate) fn pmem_region(dev: &str, size: u64, interleave_ways: u64) -> Region {
    Region {
        dev: dev.to_string(),
        size,
        available_size: size,
        max_available_extent: size,
        interleave_ways,
        enabled: true,
        region_type: RegionType::Pmem,
        namespaces: Vec::new(),
    }
}

#[derive(Default)]
struct TopologyWorld {
    buses: Vec<Bus>,
    /// Namespace device name to bytes taken from its region
    allocations: HashMap<String, u64>,
    next_namespace: usize,
    calls: Vec<String>,
}

/// PMEM hardware model with namespaces backed by sparse files
///
/// Created namespaces report one alignment unit less than requested, the
/// way label and info-block metadata eat into real namespaces.
pub(crate) struct FakeTopology {
    dir: TempDir,
    world: Mutex<TopologyWorld>,
}

impl FakeTopology {
    pub(crate) fn new(buses: Vec<Bus>) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            world: Mutex::new(TopologyWorld {
                buses,
                ..Default::default()
            }),
        }
    }

    /// One `ndbus0` bus holding `regions`
    pub(crate) fn single_bus(regions: Vec<Region>) -> Self {
        Self::new(vec![Bus {
            dev: "ndbus0".to_string(),
            provider: "ACPI.NFIT".to_string(),
            regions,
        }])
    }

    /// Directory holding the namespace device nodes
    pub(crate) fn dev_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Add an existing namespace to `region`, taking its size from the region
    pub(crate) fn insert_namespace(&self, region: &str, name: &str, size: u64) -> Namespace {
        let mut world = self.world.lock();
        let index = world.next_namespace;
        world.next_namespace += 1;

        let ns = Namespace {
            dev: format!("namespace0.{}", index),
            name: name.to_string(),
            size,
            mode: NamespaceMode::Fsdax,
            blockdev: Some(format!("pmem0.{}", index)),
            active: true,
        };
        garbage_file(&self.dir.path().join(format!("pmem0.{}", index)), size);

        let region = world
            .buses
            .iter_mut()
            .flat_map(|b| b.regions.iter_mut())
            .find(|r| r.dev == region)
            .unwrap();
        region.available_size -= size;
        region.max_available_extent -= size;
        region.namespaces.push(ns.clone());
        world.allocations.insert(ns.dev.clone(), size);
        ns
    }

    /// Remove the device node of a namespace behind the backend's back
    pub(crate) fn remove_device_node(&self, name: &str) {
        let world = self.world.lock();
        let blockdev = world
            .buses
            .iter()
            .flat_map(|b| b.regions.iter())
            .flat_map(|r| r.namespaces.iter())
            .find(|ns| ns.name == name)
            .and_then(|ns| ns.blockdev.clone())
            .unwrap();
        std::fs::remove_file(self.dir.path().join(blockdev)).unwrap();
    }

    pub(crate) fn namespace_names(&self) -> Vec<String> {
        self.world
            .lock()
            .buses
            .iter()
            .flat_map(|b| b.regions.iter())
            .flat_map(|r| r.namespaces.iter())
            .map(|ns| ns.name.clone())
            .collect()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.world.lock().calls.clone()
    }
}

#[async_trait]
impl Topology for FakeTopology {
    async fn buses(&self) -> Result<Vec<Bus>> {
        let mut world = self.world.lock();
        world.calls.push("list".to_string());
        Ok(world.buses.clone())
    }

    async fn create_namespace(&self, opts: &CreateNamespaceOpts) -> Result<Namespace> {
        let mut world = self.world.lock();
        world.calls.push(format!(
            "create-namespace {} {} {} {}",
            opts.region, opts.name, opts.size, opts.align
        ));
        let index = world.next_namespace;

        let region = world
            .buses
            .iter_mut()
            .flat_map(|b| b.regions.iter_mut())
            .find(|r| r.dev == opts.region)
            .ok_or_else(|| tool_error("ndctl", 1, format!("{} not found", opts.region)))?;
        if !region.enabled || region.region_type != RegionType::Pmem {
            return Err(tool_error("ndctl", 1, "region not capable of fsdax"));
        }
        if opts.size > region.max_available_extent {
            return Err(tool_error(
                "ndctl",
                1,
                "failed to create namespace: No space left on device",
            ));
        }

        let blockdev = format!("pmem0.{}", index);
        let ns = Namespace {
            dev: format!("namespace0.{}", index),
            name: opts.name.clone(),
            size: opts.size.saturating_sub(opts.align),
            mode: opts.mode,
            blockdev: Some(blockdev.clone()),
            active: true,
        };
        region.available_size -= opts.size;
        region.max_available_extent -= opts.size;
        region.namespaces.push(ns.clone());

        world.next_namespace += 1;
        world.allocations.insert(ns.dev.clone(), opts.size);
        garbage_file(&self.dir.path().join(blockdev), ns.size);
        Ok(ns)
    }

    async fn destroy_namespace(&self, name: &str) -> Result<()> {
        let mut world = self.world.lock();
        world.calls.push(format!("destroy-namespace {}", name));

        let mut removed = None;
        for region in world.buses.iter_mut().flat_map(|b| b.regions.iter_mut()) {
            if let Some(pos) = region
                .namespaces
                .iter()
                .position(|ns| ns.active && ns.name == name)
            {
                let ns = region.namespaces.remove(pos);
                removed = Some((region.dev.clone(), ns));
                break;
            }
        }
        let (region_dev, ns) = removed.ok_or_else(|| Error::not_found(name))?;

        let size = world.allocations.remove(&ns.dev).unwrap_or(ns.size);
        if let Some(region) = world
            .buses
            .iter_mut()
            .flat_map(|b| b.regions.iter_mut())
            .find(|r| r.dev == region_dev)
        {
            region.available_size += size;
            region.max_available_extent += size;
        }
        if let Some(blockdev) = ns.blockdev {
            let _ = std::fs::remove_file(self.dir.path().join(blockdev));
        }
        Ok(())
    }
}
