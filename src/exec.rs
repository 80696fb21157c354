//! Command Runner
//!
//! Runs the external storage tools (LVM, ndctl) and turns non-zero exits
//! into structured errors.

use crate::domain::ports::CommandRunner;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Runs programs on the host via `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        debug!("Executing: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::ToolFailure {
                command: program.to_string(),
                status: None,
                stderr: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(
                "{} exited with {:?}: stdout={:?} stderr={:?}",
                program,
                output.status.code(),
                stdout,
                stderr
            );
            return Err(Error::ToolFailure {
                command: program.to_string(),
                status: output.status.code(),
                stderr,
            });
        }

        debug!("{} output: {:?}", program, stdout);
        Ok(stdout)
    }
}
