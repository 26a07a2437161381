//! Launching the capture service on the device.
//!
//! The session only needs two things from deployment: "the service is
//! listening on its local socket" (or an error), and a way to terminate
//! it later. [`Deployer`] is that narrow seam; [`AdbShellDeployer`] is
//! the real implementation running `app_process` through `adb shell`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MirrorError, Result};
use crate::session::CaptureParams;

// ── Constants ────────────────────────────────────────────────────

/// Token the capture service prints on its first line once it is up.
pub const BANNER_TOKEN: &str = "Device";

/// Entry point class of the capture service.
const SERVER_CLASS: &str = "com.genymobile.scrcpy.Server";

const DEFAULT_BANNER_TIMEOUT: Duration = Duration::from_secs(10);

// ── Traits ───────────────────────────────────────────────────────

/// Starts the capture service for one device.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Launch the service and wait until it reports readiness.
    async fn deploy(
        &self,
        device_id: &str,
        params: &CaptureParams,
    ) -> Result<Box<dyn DeploymentHandle>>;
}

/// A running capture service.
#[async_trait]
pub trait DeploymentHandle: Send + Sync {
    /// Stop the service. Must tolerate a service that already exited.
    async fn terminate(&mut self) -> Result<()>;
}

/// `true` when the first output line announces a started service.
pub fn is_startup_banner(line: &str) -> bool {
    line.contains(BANNER_TOKEN)
}

// ── ServerOptions ────────────────────────────────────────────────

/// Capture-service settings that are not per-session capture parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Location of the server jar on the device.
    pub server_path: String,
    /// Server protocol version; must match the jar.
    pub version: String,
    pub log_level: String,
    pub encoder_name: String,
    pub codec_options: String,
    pub display_id: u32,
    pub show_touches: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            server_path: "/data/local/tmp/scrcpy-server".into(),
            version: "1.24".into(),
            log_level: "info".into(),
            encoder_name: "OMX.google.h264.encoder".into(),
            codec_options: "profile=1,level=2".into(),
            display_id: 0,
            show_touches: true,
        }
    }
}

impl ServerOptions {
    /// Full argument list for `adb`, starting at `-s <serial>`.
    pub fn shell_args(&self, device_id: &str, params: &CaptureParams) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-s".into(),
            device_id.into(),
            "shell".into(),
            format!("CLASSPATH={}", self.server_path),
            "app_process".into(),
            "/".into(),
            SERVER_CLASS.into(),
            self.version.clone(),
        ];
        args.extend(
            [
                ("log_level", self.log_level.clone()),
                ("max_size", params.max_size.to_string()),
                ("bit_rate", params.bit_rate.to_string()),
                ("max_fps", params.max_fps.to_string()),
                ("lock_video_orientation", "-1".into()),
                ("tunnel_forward", "true".into()),
                ("control", "true".into()),
                ("display_id", self.display_id.to_string()),
                ("show_touches", self.show_touches.to_string()),
                ("stay_awake", "false".into()),
                ("codec_options", self.codec_options.clone()),
                ("encoder_name", self.encoder_name.clone()),
                ("power_off_on_close", "false".into()),
                ("clipboard_autosync", "false".into()),
                ("downsize_on_error", "true".into()),
                ("cleanup", "true".into()),
                ("power_on", "true".into()),
                ("send_device_meta", "true".into()),
                ("send_frame_meta", "false".into()),
                ("send_dummy_byte", "true".into()),
                ("raw_video_stream", "false".into()),
            ]
            .into_iter()
            .map(|(key, value)| format!("{key}={value}")),
        );
        args
    }
}

// ── AdbShellDeployer ─────────────────────────────────────────────

/// Runs the capture service with `adb -s <serial> shell app_process ...`.
#[derive(Debug, Clone)]
pub struct AdbShellDeployer {
    adb_path: String,
    options: ServerOptions,
    banner_timeout: Duration,
}

impl AdbShellDeployer {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            adb_path: "adb".into(),
            options,
            banner_timeout: DEFAULT_BANNER_TIMEOUT,
        }
    }

    /// Use a specific `adb` executable.
    pub fn with_adb_path(mut self, adb_path: impl Into<String>) -> Self {
        self.adb_path = adb_path.into();
        self
    }

    /// How long to wait for the first line of output.
    pub fn with_banner_timeout(mut self, timeout: Duration) -> Self {
        self.banner_timeout = timeout;
        self
    }

    pub fn adb_path(&self) -> &str {
        &self.adb_path
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }
}

impl Default for AdbShellDeployer {
    fn default() -> Self {
        Self::new(ServerOptions::default())
    }
}

#[async_trait]
impl Deployer for AdbShellDeployer {
    async fn deploy(
        &self,
        device_id: &str,
        params: &CaptureParams,
    ) -> Result<Box<dyn DeploymentHandle>> {
        let args = self.options.shell_args(device_id, params);
        self.launch(device_id, &args).await
    }
}

impl AdbShellDeployer {
    /// Spawn `adb_path args...` and wait for the startup banner.
    async fn launch(&self, device_id: &str, args: &[String]) -> Result<Box<dyn DeploymentHandle>> {
        debug!("Executing: {} {}", self.adb_path, args.join(" "));

        let mut child = Command::new(&self.adb_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MirrorError::Deployment(format!("failed to run {}: {e}", self.adb_path)))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(MirrorError::Deployment("capture service output not captured".into()));
        };
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();

        let first =
            tokio::time::timeout(self.banner_timeout, first_line(&mut stdout, &mut stderr)).await;

        let line = match first {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(MirrorError::Deployment(format!(
                    "{device_id}: capture service closed its output without a banner"
                )));
            }
            Ok(Err(e)) => format!("<unreadable output: {e}>"),
            Err(_) => {
                let _ = child.start_kill();
                return Err(MirrorError::Deployment(format!(
                    "{device_id}: no output from capture service within {:?}",
                    self.banner_timeout
                )));
            }
        };

        if !is_startup_banner(&line) {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(MirrorError::Deployment(format!(
                "{device_id}: unexpected startup output {line:?}"
            )));
        }

        info!(device = %device_id, "capture service started: {line}");
        let drain = tokio::spawn(drain_output(device_id.to_string(), stdout, stderr));
        Ok(Box::new(ShellDeployment { child, drain }))
    }
}

/// First line printed on either stream, stdout winning a tie.
///
/// stdout and stderr are one console for the service: a stream that
/// closes is skipped and the other one is still waited on. `None` once
/// both closed without a line.
async fn first_line<O, E>(
    stdout: &mut Lines<O>,
    stderr: &mut Lines<E>,
) -> std::io::Result<Option<String>>
where
    O: AsyncBufRead + Unpin,
    E: AsyncBufRead + Unpin,
{
    let mut stdout_open = true;
    let mut stderr_open = true;
    while stdout_open || stderr_open {
        tokio::select! {
            biased;
            line = stdout.next_line(), if stdout_open => match line? {
                Some(line) => return Ok(Some(line)),
                None => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line? {
                Some(line) => return Ok(Some(line)),
                None => stderr_open = false,
            },
        }
    }
    Ok(None)
}

/// Keep reading the service's output so its pipes never fill up.
async fn drain_output(
    device_id: String,
    mut stdout: Lines<BufReader<ChildStdout>>,
    mut stderr: Lines<BufReader<ChildStderr>>,
) {
    let mut stdout_open = true;
    let mut stderr_open = true;
    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => debug!(device = %device_id, "server: {line}"),
                _ => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => debug!(device = %device_id, "server: {line}"),
                _ => stderr_open = false,
            },
        }
    }
}

/// Handle to the `adb shell` process hosting the capture service.
struct ShellDeployment {
    child: Child,
    drain: JoinHandle<()>,
}

#[async_trait]
impl DeploymentHandle for ShellDeployment {
    async fn terminate(&mut self) -> Result<()> {
        if let Err(e) = self.child.start_kill() {
            // Already reaped or exited on its own.
            debug!("capture service kill: {e}");
        }
        match self.child.wait().await {
            Ok(status) => debug!("capture service exited: {status}"),
            Err(e) => warn!("capture service wait failed: {e}"),
        }
        self.drain.abort();
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
