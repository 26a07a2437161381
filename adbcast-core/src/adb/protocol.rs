//! ADB host protocol framing.
//!
//! ## Wire format
//!
//! **Command** (client → daemon):
//! ```text
//! length:  4 ASCII hex digits, lower-case, zero-padded
//! payload: [u8] (length bytes)
//! ```
//!
//! **Reply** (daemon → client): exactly 4 bytes, `OKAY` or `FAIL`.

use std::net::{Ipv4Addr, SocketAddr};

use crate::error::{MirrorError, Result};

// ── Constants ────────────────────────────────────────────────────

/// Loopback address the local ADB daemon listens on.
pub const ADB_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Fixed port of the local ADB daemon.
pub const ADB_PORT: u16 = 5037;

/// Size of the hex length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload the length prefix can describe.
pub const MAX_COMMAND_LEN: usize = 0xFFFF;

/// Address of the daemon on the default port.
pub fn default_daemon_addr() -> SocketAddr {
    SocketAddr::from((ADB_HOST, ADB_PORT))
}

// ── Commands ─────────────────────────────────────────────────────

/// Frame `cmd` with its 4-digit hex length prefix.
pub fn encode_command(cmd: &str) -> Result<Vec<u8>> {
    if cmd.len() > MAX_COMMAND_LEN {
        return Err(MirrorError::CommandTooLong(cmd.len()));
    }
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + cmd.len());
    frame.extend_from_slice(format!("{:04x}", cmd.len()).as_bytes());
    frame.extend_from_slice(cmd.as_bytes());
    Ok(frame)
}

/// Parse a framed command back into its payload.
pub fn decode_command(frame: &[u8]) -> Result<&str> {
    if frame.len() < LENGTH_PREFIX_SIZE {
        return Err(MirrorError::Protocol(format!(
            "command frame too short: {} < {LENGTH_PREFIX_SIZE}",
            frame.len()
        )));
    }
    let prefix = std::str::from_utf8(&frame[..LENGTH_PREFIX_SIZE])
        .map_err(|_| MirrorError::Protocol("non-ascii length prefix".into()))?;
    let len = usize::from_str_radix(prefix, 16)
        .map_err(|_| MirrorError::Protocol(format!("invalid length prefix {prefix:?}")))?;

    let payload = &frame[LENGTH_PREFIX_SIZE..];
    if payload.len() != len {
        return Err(MirrorError::Protocol(format!(
            "length prefix says {len} bytes, frame carries {}",
            payload.len()
        )));
    }
    std::str::from_utf8(payload)
        .map_err(|_| MirrorError::Protocol("command payload is not utf-8".into()))
}

/// Selects the device every later command on the connection talks to.
pub fn transport_command(device_id: &str) -> String {
    format!("host:transport:{device_id}")
}

// ── Replies ──────────────────────────────────────────────────────

/// Status word sent by the daemon after each command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdbReply {
    Okay,
    Fail,
}

impl AdbReply {
    pub const OKAY: [u8; 4] = *b"OKAY";
    pub const FAIL: [u8; 4] = *b"FAIL";

    /// Classify a 4-byte status word.
    pub fn parse(bytes: [u8; 4]) -> Result<Self> {
        match bytes {
            Self::OKAY => Ok(Self::Okay),
            Self::FAIL => Ok(Self::Fail),
            other => Err(MirrorError::MalformedReply(other)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
