//! Device Clearing
//!
//! Zeroes the start of a device so a stale filesystem or partition table
//! cannot be detected by the next user, and waits for device nodes that
//! show up asynchronously after allocation.

use crate::config::{ClearConfig, DeviceWaitConfig};
use crate::domain::ports::DeviceInfo;
use crate::error::{Error, Result};
use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const ZERO_CHUNK: usize = 1024 * 1024;

/// Zero the leading span of a device, or all of it when `flush` is set
///
/// A missing device node yields `DeviceNotFound`, so that callers on a
/// delete path can treat the device as already gone.
pub async fn clear_device(device: &DeviceInfo, flush: bool, config: &ClearConfig) -> Result<()> {
    let path = &device.path;

    let metadata = match fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::not_found(path.as_str())),
        Err(e) => return Err(e.into()),
    };
    if config.require_block_device && !metadata.file_type().is_block_device() {
        return Err(Error::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("{} is not a block device", path),
        )));
    }

    let mut remaining = if flush {
        device.size
    } else if device.size > 0 {
        config.span_bytes.min(device.size)
    } else {
        config.span_bytes
    };
    debug!(
        "Clearing {} bytes of {} (flush: {})",
        remaining, path, flush
    );

    let mut file = match OpenOptions::new().write(true).open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::not_found(path.as_str())),
        Err(e) => return Err(e.into()),
    };

    let zeros = vec![0u8; ZERO_CHUNK];
    while remaining > 0 {
        let n = remaining.min(ZERO_CHUNK as u64) as usize;
        file.write_all(&zeros[..n]).await?;
        remaining -= n as u64;
    }
    file.flush().await?;

    if flush {
        file.sync_all().await?;
        info!("Erased and synced {} ({} bytes)", path, device.size);
    }

    Ok(())
}

/// Poll until `path` exists, within the configured number of attempts
pub async fn wait_device_appears(path: &str, config: &DeviceWaitConfig) -> Result<()> {
    for attempt in 0..config.attempts.max(1) {
        match fs::metadata(path).await {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    "Device node {} not present yet (attempt {}/{})",
                    path,
                    attempt + 1,
                    config.attempts
                );
            }
            Err(e) => return Err(e.into()),
        }
        tokio::time::sleep(config.interval()).await;
    }

    Err(Error::Io(std::io::Error::new(
        ErrorKind::TimedOut,
        format!("timeout waiting for device node {}", path),
    )))
}
