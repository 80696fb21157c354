//! ndctl JSON Model
//!
//! Mirrors the JSON printed by `ndctl list` and `ndctl create-namespace`
//! and converts it into the domain topology types.

use crate::domain::ports::{Bus, Namespace, NamespaceMode, Region, RegionType};
use crate::error::{Error, Result};
use serde::Deserialize;

const DISABLED: &str = "disabled";

/// ndctl prints a bare object instead of an array when there is exactly one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(t) => vec![t],
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BusJson {
    pub dev: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub regions: Vec<RegionJson>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegionJson {
    pub dev: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub available_size: u64,
    #[serde(default)]
    pub max_available_extent: u64,
    #[serde(rename = "type", default = "unknown_region_type")]
    pub region_type: RegionType,
    #[serde(default)]
    pub num_mappings: Option<u64>,
    #[serde(default)]
    pub mappings: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub namespaces: Vec<NamespaceJson>,
}

fn unknown_region_type() -> RegionType {
    RegionType::Unknown
}

#[derive(Debug, Deserialize)]
pub(crate) struct NamespaceJson {
    pub dev: String,
    #[serde(default = "unknown_mode")]
    pub mode: NamespaceMode,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub blockdev: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

fn unknown_mode() -> NamespaceMode {
    NamespaceMode::Unknown
}

impl From<NamespaceJson> for Namespace {
    fn from(ns: NamespaceJson) -> Self {
        // Idle seed namespaces are listed with size 0
        let active = ns.state.as_deref() != Some(DISABLED) && ns.size > 0;
        Namespace {
            dev: ns.dev,
            name: ns.name.unwrap_or_default(),
            size: ns.size,
            mode: ns.mode,
            blockdev: ns.blockdev,
            active,
        }
    }
}

impl From<RegionJson> for Region {
    fn from(r: RegionJson) -> Self {
        let interleave_ways = r
            .num_mappings
            .or_else(|| r.mappings.as_ref().map(|m| m.len() as u64))
            .filter(|&n| n > 0)
            .unwrap_or(1);
        Region {
            dev: r.dev,
            size: r.size,
            available_size: r.available_size,
            max_available_extent: r.max_available_extent,
            interleave_ways,
            enabled: r.state.as_deref() != Some(DISABLED),
            region_type: r.region_type,
            namespaces: r.namespaces.into_iter().map(Namespace::from).collect(),
        }
    }
}

impl From<BusJson> for Bus {
    fn from(b: BusJson) -> Self {
        Bus {
            dev: b.dev,
            provider: b.provider,
            regions: b.regions.into_iter().map(Region::from).collect(),
        }
    }
}

/// Parse `ndctl list --buses --regions --namespaces --mappings --idle` output
pub fn parse_bus_list(output: &str) -> Result<Vec<Bus>> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let buses: OneOrMany<BusJson> =
        serde_json::from_str(output).map_err(|e| Error::parse("ndctl list", e.to_string()))?;
    Ok(buses.into_vec().into_iter().map(Bus::from).collect())
}

/// Parse the namespace object printed by `ndctl create-namespace`
pub fn parse_namespace(output: &str) -> Result<Namespace> {
    let ns: NamespaceJson = serde_json::from_str(output)
        .map_err(|e| Error::parse("ndctl create-namespace", e.to_string()))?;
    Ok(ns.into())
}
