//! # adbcast-relay: device mirroring relay
//!
//! Runs one [`DeviceSession`](adbcast_core::DeviceSession) and serves its
//! access units to any number of TCP viewers.
//!
//! - **config**: TOML configuration with defaults for every field.
//! - **viewer**: viewer listener and the framing viewers read.

pub mod config;
pub mod viewer;
