//! Capture parameters and connection options for a [`DeviceSession`](super::DeviceSession).

use std::net::SocketAddr;
use std::time::Duration;

use crate::adb::RetryPolicy;
use crate::adb::protocol;
use crate::adb::tunnel::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_INTERVAL};

/// Socket the capture service listens on, on the device.
pub const DEFAULT_SOCKET_NAME: &str = "localabstract:scrcpy";

/// Parameters handed to the capture service. Fixed for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureParams {
    /// Longest side of the encoded picture, in pixels.
    pub max_size: u32,
    /// Target video bit rate, in bits per second.
    pub bit_rate: u32,
    /// Frame rate cap.
    pub max_fps: u32,
    /// Connection attempts per tunnel before giving up.
    pub connect_timeout: u32,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            max_size: 720,
            bit_rate: 1_280_000,
            max_fps: 30,
            connect_timeout: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

/// Where and how the session reaches the capture service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Address of the local ADB daemon.
    pub daemon_addr: SocketAddr,
    /// Device-local socket both tunnels open.
    pub socket_name: String,
    /// Sleep between two tunnel attempts.
    pub retry_interval: Duration,
    /// Deadline of a single tunnel attempt.
    pub attempt_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            daemon_addr: protocol::default_daemon_addr(),
            socket_name: DEFAULT_SOCKET_NAME.to_string(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            attempt_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SessionOptions {
    /// Retry schedule for opening a tunnel with `params`.
    pub fn retry_policy(&self, params: &CaptureParams) -> RetryPolicy {
        RetryPolicy {
            attempts: params.connect_timeout,
            interval: self.retry_interval,
        }
    }
}
