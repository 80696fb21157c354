//! Hardware Topology Reader
//!
//! Enumerates PMEM buses, regions and namespaces and creates or destroys
//! namespaces, by driving the `ndctl` executable and reading its JSON.

pub mod model;

pub use model::{parse_bus_list, parse_namespace};

use crate::domain::ports::{Bus, CommandRunnerRef, CreateNamespaceOpts, Namespace, Topology};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, info};

const NDCTL: &str = "ndctl";

/// `--mappings` is needed for the per-region DIMM list that gives the
/// interleave ways
pub const LIST_ARGS: [&str; 6] = [
    "list",
    "--buses",
    "--regions",
    "--namespaces",
    "--mappings",
    "--idle",
];

/// [`Topology`] backed by the `ndctl` command line tool
pub struct NdctlTopology {
    runner: CommandRunnerRef,
}

impl NdctlTopology {
    pub fn new(runner: CommandRunnerRef) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Topology for NdctlTopology {
    async fn buses(&self) -> Result<Vec<Bus>> {
        let output = self
            .runner
            .run(NDCTL, &LIST_ARGS)
            .await?;
        let buses = parse_bus_list(&output)?;
        debug!("ndctl reported {} bus(es)", buses.len());
        Ok(buses)
    }

    async fn create_namespace(&self, opts: &CreateNamespaceOpts) -> Result<Namespace> {
        let region = format!("--region={}", opts.region);
        let mode = format!("--mode={}", opts.mode);
        let size = format!("--size={}", opts.size);
        let align = format!("--align={}", opts.align);
        let name = format!("--name={}", opts.name);

        let output = self
            .runner
            .run(
                NDCTL,
                &["create-namespace", &region, &mode, &size, &align, &name],
            )
            .await?;
        let ns = parse_namespace(&output)?;
        info!(
            "Namespace created: {} ({}, {} bytes, {:?})",
            ns.dev, ns.name, ns.size, ns.blockdev
        );
        Ok(ns)
    }

    async fn destroy_namespace(&self, name: &str) -> Result<()> {
        let ns = self.namespace_by_name(name).await?;
        if ns.dev.is_empty() {
            return Err(Error::not_found(name));
        }
        self.runner
            .run(NDCTL, &["destroy-namespace", "--force", &ns.dev])
            .await?;
        info!("Namespace destroyed: {} ({})", ns.dev, name);
        Ok(())
    }
}
