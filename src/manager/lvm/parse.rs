//! LVM output parsing
//!
//! `vgs` and `lvs` are run with `--noheadings --nosuffix --units B`, which
//! prints whitespace-separated columns with byte sizes and no header row.
//!
//! Pool inventory is strict: a malformed row, an unknown or repeated pool,
//! or a row count different from the number of queried pools fails the
//! parse.
//! Volume listings are lenient and skip malformed rows.

use crate::domain::ports::{DeviceInfo, PoolInfo};
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::warn;

pub const VGS_ARGS: [&str; 6] = [
    "--noheadings",
    "--nosuffix",
    "-o",
    "vg_name,vg_size,vg_free",
    "--units",
    "B",
];

pub const LVS_ARGS: [&str; 6] = [
    "--noheadings",
    "--nosuffix",
    "-o",
    "lv_name,lv_path,lv_size",
    "--units",
    "B",
];

fn parse_bytes(command: &str, field: &str, line: &str) -> Result<u64> {
    field
        .parse()
        .map_err(|_| Error::parse(command, format!("invalid size {:?} in line {:?}", field, line)))
}

/// Parse `vgs` output for exactly the pools in `queried`
///
/// Rows keep the order the tool printed them in.
pub fn parse_vgs_output(output: &str, queried: &[String]) -> Result<Vec<PoolInfo>> {
    let mut pools = Vec::with_capacity(queried.len());
    let mut seen = HashSet::new();

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(Error::parse("vgs", format!("unexpected line {:?}", line)));
        }
        let name = fields[0];
        if !queried.iter().any(|q| q == name) {
            return Err(Error::parse(
                "vgs",
                format!("unexpected volume group {:?}", name),
            ));
        }
        if !seen.insert(name) {
            return Err(Error::parse(
                "vgs",
                format!("duplicate volume group {:?}", name),
            ));
        }
        pools.push(PoolInfo {
            name: name.to_string(),
            size: parse_bytes("vgs", fields[1], line)?,
            free: parse_bytes("vgs", fields[2], line)?,
        });
    }

    if pools.len() != queried.len() {
        return Err(Error::parse(
            "vgs",
            format!(
                "expected {} volume group(s), got {}",
                queried.len(),
                pools.len()
            ),
        ));
    }

    Ok(pools)
}

/// Parse `lvs` output into devices keyed by volume id
pub fn parse_lvs_output(output: &str) -> HashMap<String, DeviceInfo> {
    let mut devices = HashMap::new();

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            continue;
        }
        let size = match fields[2].parse() {
            Ok(size) => size,
            Err(_) => {
                warn!("Skipping lvs line with invalid size: {:?}", line);
                continue;
            }
        };
        devices.insert(
            fields[0].to_string(),
            DeviceInfo {
                volume_id: fields[0].to_string(),
                path: fields[1].to_string(),
                size,
            },
        );
    }

    devices
}
