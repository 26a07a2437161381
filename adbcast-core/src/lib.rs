//! # adbcast-core
//!
//! Host side of an ADB tunnelled screen-mirroring session.
//!
//! This crate contains:
//! - **ADB client**: command framing, `OKAY`/`FAIL` replies and `TunnelSocket`
//! - **Stream**: `StreamDemuxer` cutting the video stream into `AccessUnit`s
//! - **Registry**: `SubscriberRegistry` fanning units out to subscribers
//! - **Controller**: `StreamController`, the cancellable demux/broadcast loop
//! - **Deploy**: `Deployer` seam and the `adb shell` implementation
//! - **Session**: `DeviceSession` and its `SessionPhase` state machine
//! - **Error**: `MirrorError`, typed `thiserror`-based errors

pub mod adb;
pub mod controller;
pub mod deploy;
pub mod error;
pub mod registry;
pub mod session;
pub mod stream;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use adb::{RetryPolicy, TunnelSocket, open_tunnel};
pub use controller::{StreamController, StreamStats};
pub use deploy::{AdbShellDeployer, Deployer, DeploymentHandle, ServerOptions};
pub use error::{MirrorError, Result};
pub use registry::{ChannelSubscriber, Subscriber, SubscriberId, SubscriberMessage, SubscriberRegistry};
pub use session::{
    CaptureParams, DeviceMetadata, DeviceSession, Resolution, SessionOptions, SessionPhase,
};
pub use stream::{AccessUnit, START_CODE, StreamDemuxer};
