//! Configuration for the relay.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use adbcast_core::{AdbShellDeployer, CaptureParams, ServerOptions, SessionOptions};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Device and capture settings.
    pub device: DeviceConfig,
    /// Local ADB daemon and executable.
    pub adb: AdbConfig,
    /// Capture service on the device.
    pub server: ServerConfig,
    /// Viewer listener.
    pub viewer: ViewerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Device and capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// ADB serial of the device to mirror.
    pub serial: String,
    /// Longest side of the picture in pixels.
    pub max_size: u32,
    /// Video bit rate in bits per second.
    pub bit_rate: u32,
    pub max_fps: u32,
    /// Tunnel connection attempts before giving up.
    pub connect_attempts: u32,
    /// Pause between two tunnel attempts in milliseconds.
    pub retry_interval_ms: u64,
}

/// ADB daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbConfig {
    pub host: IpAddr,
    pub port: u16,
    /// `adb` executable used to launch the capture service.
    pub adb_path: String,
    /// Device-local socket the capture service listens on.
    pub socket_name: String,
    /// How long to wait for the capture service's first output line.
    pub banner_timeout_ms: u64,
}

/// Capture service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server jar location on the device.
    pub path: String,
    pub version: String,
    pub encoder_name: String,
    pub codec_options: String,
    pub display_id: u32,
    pub show_touches: bool,
}

/// Viewer listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Address viewers connect to.
    pub listen: SocketAddr,
    /// Messages buffered per viewer before it is dropped as too slow.
    pub queue_depth: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        let params = CaptureParams::default();
        Self {
            serial: "emulator-5554".into(),
            max_size: params.max_size,
            bit_rate: params.bit_rate,
            max_fps: params.max_fps,
            connect_attempts: params.connect_timeout,
            retry_interval_ms: 10,
        }
    }
}

impl Default for AdbConfig {
    fn default() -> Self {
        let options = SessionOptions::default();
        Self {
            host: options.daemon_addr.ip(),
            port: options.daemon_addr.port(),
            adb_path: "adb".into(),
            socket_name: options.socket_name,
            banner_timeout_ms: 10_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let options = ServerOptions::default();
        Self {
            path: options.server_path,
            version: options.version,
            encoder_name: options.encoder_name,
            codec_options: options.codec_options,
            display_id: options.display_id,
            show_touches: options.show_touches,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 27183),
            queue_depth: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl RelayConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn to_capture_params(&self) -> CaptureParams {
        CaptureParams {
            max_size: self.device.max_size,
            bit_rate: self.device.bit_rate,
            max_fps: self.device.max_fps.max(1),
            connect_timeout: self.device.connect_attempts.max(1),
        }
    }

    pub fn to_session_options(&self) -> SessionOptions {
        SessionOptions {
            daemon_addr: SocketAddr::new(self.adb.host, self.adb.port),
            socket_name: self.adb.socket_name.clone(),
            retry_interval: Duration::from_millis(self.device.retry_interval_ms),
            ..SessionOptions::default()
        }
    }

    pub fn to_deployer(&self) -> AdbShellDeployer {
        let options = ServerOptions {
            server_path: self.server.path.clone(),
            version: self.server.version.clone(),
            encoder_name: self.server.encoder_name.clone(),
            codec_options: self.server.codec_options.clone(),
            display_id: self.server.display_id,
            show_touches: self.server.show_touches,
            ..ServerOptions::default()
        };
        AdbShellDeployer::new(options)
            .with_adb_path(self.adb.adb_path.clone())
            .with_banner_timeout(Duration::from_millis(self.adb.banner_timeout_ms))
    }
}

// ── Tests ────────────────────────────────────────────────────────
