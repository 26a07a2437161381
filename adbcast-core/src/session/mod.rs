//! One mirroring session with one device.
//!
//! A [`DeviceSession`] deploys the capture service, opens the video and
//! control tunnels, reads the device metadata and then hands the video
//! tunnel to a [`StreamController`] that broadcasts access units to the
//! session's [`SubscriberRegistry`].
//!
//! Sessions are single use: once stopped, create a new one to reconnect.

pub mod config;
pub mod handshake;
pub mod phase;

pub use config::{CaptureParams, DEFAULT_SOCKET_NAME, SessionOptions};
pub use handshake::{DeviceMetadata, Resolution};
pub use phase::SessionPhase;

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adb::TunnelSocket;
use crate::controller::{StreamController, StreamStats};
use crate::deploy::{Deployer, DeploymentHandle};
use crate::error::{MirrorError, Result};
use crate::registry::SubscriberRegistry;
use crate::stream::StreamDemuxer;

/// Resources owned by a running session. Empty before `start` and after `stop`.
#[derive(Default)]
struct Resources {
    deployment: Option<Box<dyn DeploymentHandle>>,
    video: Option<TunnelSocket>,
    control: Option<TunnelSocket>,
    controller: Option<StreamController>,
}

impl Resources {
    fn is_empty(&self) -> bool {
        self.deployment.is_none()
            && self.video.is_none()
            && self.control.is_none()
            && self.controller.is_none()
    }
}

pub struct DeviceSession {
    device_id: String,
    params: CaptureParams,
    options: SessionOptions,
    deployer: Arc<dyn Deployer>,
    registry: SubscriberRegistry,
    metadata: OnceLock<DeviceMetadata>,
    stats: OnceLock<Arc<StreamStats>>,
    stream_finished: OnceLock<CancellationToken>,
    phase: Mutex<SessionPhase>,
    /// Held for the whole of `start` and `stop`, which never interleave.
    resources: tokio::sync::Mutex<Resources>,
}

impl DeviceSession {
    pub fn new(
        device_id: impl Into<String>,
        params: CaptureParams,
        deployer: Arc<dyn Deployer>,
    ) -> Self {
        Self::with_options(device_id, params, SessionOptions::default(), deployer)
    }

    pub fn with_options(
        device_id: impl Into<String>,
        params: CaptureParams,
        options: SessionOptions,
        deployer: Arc<dyn Deployer>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            params,
            options,
            deployer,
            registry: SubscriberRegistry::new(),
            metadata: OnceLock::new(),
            stats: OnceLock::new(),
            stream_finished: OnceLock::new(),
            phase: Mutex::new(SessionPhase::Idle),
            resources: tokio::sync::Mutex::new(Resources::default()),
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn params(&self) -> &CaptureParams {
        &self.params
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Subscribers receiving this session's access units.
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock_phase().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.lock_phase().is_streaming()
    }

    /// Metadata read during the handshake, once it has been read.
    pub fn metadata(&self) -> Option<&DeviceMetadata> {
        self.metadata.get()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.metadata.get().map(|m| m.device_name.as_str())
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.metadata.get().map(|m| m.resolution)
    }

    /// Counters of the broadcast loop, once streaming has begun.
    pub fn stats(&self) -> Option<Arc<StreamStats>> {
        self.stats.get().cloned()
    }

    /// Resolves once the broadcast loop has exited, whether the device
    /// stopped sending video or the session was stopped. Resolves at once
    /// if streaming never began.
    pub async fn stream_ended(&self) {
        if let Some(finished) = self.stream_finished.get() {
            finished.cancelled().await;
        }
    }

    /// `true` when the session holds no socket, loop or deployment.
    pub async fn is_released(&self) -> bool {
        self.resources.lock().await.is_empty()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Bring the session up to `Streaming`.
    ///
    /// Only valid on a fresh session. On failure everything opened so far
    /// is torn down and the session ends `Stopped`.
    pub async fn start(&self) -> Result<()> {
        let mut res = self.resources.lock().await;
        self.lock_phase().begin_deploy()?;
        info!(device = %self.device_id, "starting session");

        match self.bring_up(&mut res).await {
            Ok(()) => {
                info!(
                    device = %self.device_id,
                    name = self.device_name().unwrap_or_default(),
                    resolution = %self.resolution().map(|r| r.to_string()).unwrap_or_default(),
                    "session streaming"
                );
                Ok(())
            }
            Err(e) => {
                warn!(device = %self.device_id, "session start failed: {e}");
                self.teardown(&mut res).await;
                Err(e)
            }
        }
    }

    /// Tear the session down. Safe to call in any phase, any number of times.
    pub async fn stop(&self) {
        let mut res = self.resources.lock().await;
        if self.lock_phase().is_stopped() && res.is_empty() {
            return;
        }
        self.teardown(&mut res).await;
        info!(device = %self.device_id, "session stopped");
    }

    /// Write opaque bytes on the control tunnel.
    pub async fn send_control(&self, data: &[u8]) -> Result<()> {
        let mut res = self.resources.lock().await;
        if !self.is_streaming() {
            return Err(MirrorError::NotConnected);
        }
        match res.control.as_mut() {
            Some(control) => control.write_all(data).await,
            None => Err(MirrorError::NotConnected),
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn bring_up(&self, res: &mut Resources) -> Result<()> {
        let deployment = match self.deployer.deploy(&self.device_id, &self.params).await {
            Ok(deployment) => deployment,
            Err(e) => {
                self.registry
                    .notify_and_close_all(&format!("{}: {e}", self.device_id))
                    .await;
                return Err(e);
            }
        };
        res.deployment = Some(deployment);

        self.lock_phase().begin_video_handshake()?;
        let video = res.video.insert(self.tunnel());
        let attempts = video.connect_with_retry(&self.retry_policy()).await?;
        debug!(
            device = %self.device_id,
            daemon = %video.daemon_addr(),
            attempts,
            "video tunnel open"
        );
        handshake::check_dummy_byte(&video.read_exactly(1).await?)?;

        self.lock_phase().begin_control_handshake()?;
        let control = res.control.insert(self.tunnel());
        let attempts = control.connect_with_retry(&self.retry_policy()).await?;
        debug!(device = %self.device_id, attempts, "control tunnel open");

        let Some(video) = res.video.as_mut() else {
            return Err(MirrorError::NotConnected);
        };
        let device_name =
            handshake::parse_device_name(&video.read_exactly(handshake::DEVICE_NAME_LEN).await?)?;
        let resolution =
            handshake::parse_resolution(&video.read_exactly(handshake::RESOLUTION_LEN).await?)?;
        let _ = self.metadata.set(DeviceMetadata {
            device_name,
            resolution,
        });

        let Some(video) = res.video.take() else {
            return Err(MirrorError::NotConnected);
        };
        let controller = StreamController::spawn(StreamDemuxer::new(video), self.registry.clone());
        let _ = self.stats.set(controller.stats());
        let _ = self.stream_finished.set(controller.finished());
        res.controller = Some(controller);

        self.lock_phase().begin_streaming()
    }

    /// Release everything in `res` and move to `Stopped`.
    ///
    /// The loop is stopped before any socket is closed so no read races
    /// a close.
    async fn teardown(&self, res: &mut Resources) {
        if let Some(controller) = res.controller.take() {
            if let Some(video) = controller.shutdown().await {
                res.video = Some(video);
            }
        }
        if let Some(mut video) = res.video.take() {
            video.disconnect().await;
        }
        if let Some(mut control) = res.control.take() {
            control.disconnect().await;
        }
        if let Some(mut deployment) = res.deployment.take() {
            if let Err(e) = deployment.terminate().await {
                warn!(device = %self.device_id, "capture service termination failed: {e}");
            }
        }
        self.lock_phase().stop();
    }

    fn tunnel(&self) -> TunnelSocket {
        TunnelSocket::new(self.device_id.clone(), self.options.socket_name.clone())
            .with_addr(self.options.daemon_addr)
            .with_timeout(self.options.attempt_timeout)
    }

    fn retry_policy(&self) -> crate::adb::RetryPolicy {
        self.options.retry_policy(&self.params)
    }

    fn lock_phase(&self) -> MutexGuard<'_, SessionPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device_id", &self.device_id)
            .field("phase", &self.phase())
            .field("metadata", &self.metadata.get())
            .field("subscribers", &self.registry.len())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────
