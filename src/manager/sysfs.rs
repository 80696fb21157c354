//! Writable /sys check
//!
//! Namespace management writes to sysfs attributes, which fails late and
//! confusingly inside containers that mount /sys read-only.

use crate::error::{Error, Result};
use std::path::Path;
use tracing::debug;

/// Verify that `mounts_path` lists a read-write sysfs mount on /sys
pub async fn check_sysfs_writable(mounts_path: &Path) -> Result<()> {
    let table = tokio::fs::read_to_string(mounts_path).await.map_err(|e| {
        Error::Configuration(format!("cannot read {}: {}", mounts_path.display(), e))
    })?;
    check_mount_table(&table)
}

fn check_mount_table(table: &str) -> Result<()> {
    for line in table.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[0] != "sysfs" || fields[1] != "/sys" {
            continue;
        }
        let options: Vec<&str> = fields[3].split(',').collect();
        if options.contains(&"rw") {
            debug!("/sys is mounted read-write");
            return Ok(());
        }
        if options.contains(&"ro") {
            return Err(Error::Configuration(
                "/sys is read-only, namespaces cannot be managed".to_string(),
            ));
        }
        return Err(Error::Configuration(format!(
            "neither rw nor ro in /sys mount options: {}",
            fields[3]
        )));
    }

    Err(Error::Configuration(
        "no sysfs mount on /sys found".to_string(),
    ))
}
