//! Error types for the PMEM device manager
//!
//! One taxonomy shared by both backends: duplicate and unknown volumes,
//! space exhaustion, failures of the external tools and of their output
//! parsing, and invalid construction parameters.

use thiserror::Error;

/// Unified error type for the device manager
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Volume Errors
    // =========================================================================
    #[error("Device already exists: {volume_id}")]
    DeviceExists { volume_id: String },

    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Not enough space: requested {requested} bytes")]
    InsufficientSpace { requested: u64 },

    // =========================================================================
    // External Tool Errors
    // =========================================================================
    #[error("{command} failed (exit status {}): {stderr}", format_status(*.status))]
    ToolFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Failed to parse {command} output: {reason}")]
    ParseFailure { command: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_status(status: Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl Error {
    /// Shorthand for a not-found error on a volume or device path
    pub fn not_found(device: impl Into<String>) -> Self {
        Error::DeviceNotFound {
            device: device.into(),
        }
    }

    /// Shorthand for a parse error attributed to a tool
    pub fn parse(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ParseFailure {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error means the device does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DeviceNotFound { .. })
    }

    /// Check if the caller may retry the same request later
    ///
    /// Only space exhaustion qualifies: capacity may be released by
    /// concurrent deletions. Everything else fails the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::InsufficientSpace { .. })
    }

    /// Short stable label, used as a metrics dimension
    pub fn kind(&self) -> &'static str {
        match self {
            Error::DeviceExists { .. } => "already_exists",
            Error::DeviceNotFound { .. } => "not_found",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::ToolFailure { .. } => "tool_failure",
            Error::ParseFailure { .. } => "parse_failure",
            Error::Configuration(_) => "configuration",
            Error::Io(_) => "io",
        }
    }
}

/// Result type alias for the device manager
pub type Result<T> = std::result::Result<T, Error>;
