//! Configuration types for the token session.
//!
//! This crate provides:
//! - Network presets pairing a required chain id with the token address
//! - File-backed settings with per-field overrides

pub mod network;
pub mod settings;

pub use network::{NetworkConfig, NetworkConfigBuilder, NetworkType};
pub use settings::{ConfigError, NetworkSettings};
