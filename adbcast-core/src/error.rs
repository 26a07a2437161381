//! Error types for the mirroring session.
//!
//! All fallible operations return `Result<T, MirrorError>`. Variants are
//! grouped by the stage that produces them: deployment of the capture
//! service, ADB tunnel negotiation, the application handshake, and the
//! streaming loop.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Result alias used throughout `adbcast-core`.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// The canonical error type for a mirroring session.
#[derive(Debug, Error)]
pub enum MirrorError {
    // ── Deployment Errors ────────────────────────────────────────
    /// The capture service did not print the expected startup banner.
    #[error("capture service failed to start: {0}")]
    Deployment(String),

    // ── Connection Errors ────────────────────────────────────────
    /// Every connect + handshake attempt to a tunnel target failed.
    #[error("{device_id}: could not open {service} after {attempts} attempts")]
    ConnectionFailed {
        device_id: String,
        service: String,
        attempts: u32,
    },

    /// The ADB daemon answered a command with `FAIL`.
    #[error("adb rejected `{command}`")]
    AdbFailure { command: String },

    /// The ADB daemon answered with something other than `OKAY`/`FAIL`.
    #[error("malformed adb reply: {0:?}")]
    MalformedReply([u8; 4]),

    /// A command payload does not fit the 4-hex-digit length prefix.
    #[error("adb command too long: {0} bytes (max 65535)")]
    CommandTooLong(usize),

    /// An operation needed a connected tunnel but none was present.
    #[error("tunnel not connected")]
    NotConnected,

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Protocol Errors ──────────────────────────────────────────
    /// The capture service sent an unexpected value during the handshake.
    #[error("protocol error: {0}")]
    Protocol(String),

    // ── Stream Errors ────────────────────────────────────────────
    /// The video byte stream ended before the requested data arrived.
    ///
    /// `partial` holds whatever was buffered when the stream closed.
    #[error("stream ended ({} bytes pending)", .partial.len())]
    StreamEnd { partial: Bytes },

    // ── Session Errors ───────────────────────────────────────────
    /// A lifecycle call was made from a phase that does not allow it.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    // ── Subscriber Errors ────────────────────────────────────────
    /// The subscriber's receiving side has gone away.
    #[error("subscriber closed")]
    SubscriberClosed,

    /// The subscriber could not keep up with the stream.
    #[error("subscriber lagging behind the stream")]
    SubscriberLagging,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Returns `true` for a clean or abrupt end of the video stream.
    pub fn is_stream_end(&self) -> bool {
        match self {
            Self::StreamEnd { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            Self::NotConnected => true,
            _ => false,
        }
    }

    /// Returns `true` for transport-level connect or handshake failures.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::AdbFailure { .. }
                | Self::MalformedReply(_)
                | Self::Timeout(_)
                | Self::Io(_)
        )
    }
}

impl From<String> for MirrorError {
    fn from(s: String) -> Self {
        MirrorError::Other(s)
    }
}

impl From<&str> for MirrorError {
    fn from(s: &str) -> Self {
        MirrorError::Other(s.to_string())
    }
}
