//! Domain layer - Shared types and port definitions
//!
//! Defines the device manager contract and the ports its backends drive,
//! following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
