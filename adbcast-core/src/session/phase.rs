//! Lifecycle state machine of a [`DeviceSession`](super::DeviceSession).
//!
//! Transitions are validated and return `Result` instead of panicking.

use std::time::Instant;

use crate::error::{MirrorError, Result};

/// The current phase of a device session.
///
/// ```text
///  Idle ──► Deploying ──► HandshakingVideo ──► HandshakingControl ──► Streaming
///   │           │                 │                     │                 │
///   └───────────┴─────────────────┴──────────┬──────────┴─────────────────┘
///                                            ▼
///                                         Stopped
/// ```
///
/// No phase is entered twice; `Stopped` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Created, nothing started yet.
    #[default]
    Idle,

    /// Launching the capture service on the device.
    Deploying,

    /// Opening the video tunnel and waiting for the dummy byte.
    HandshakingVideo,

    /// Opening the control tunnel and reading device metadata.
    HandshakingControl,

    /// The demux/broadcast loop is running.
    Streaming {
        /// When the session entered `Streaming`.
        since: Instant,
    },

    /// Torn down; the session cannot be reused.
    Stopped,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Deploying => write!(f, "Deploying"),
            Self::HandshakingVideo => write!(f, "HandshakingVideo"),
            Self::HandshakingControl => write!(f, "HandshakingControl"),
            Self::Streaming { .. } => write!(f, "Streaming"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

impl SessionPhase {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// How long the session has been streaming, if it is.
    pub fn streaming_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Streaming { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn begin_deploy(&mut self) -> Result<()> {
        match self {
            Self::Idle => {
                *self = Self::Deploying;
                Ok(())
            }
            Self::Stopped => Err(MirrorError::InvalidState(
                "session already stopped; create a new one to reconnect",
            )),
            _ => Err(MirrorError::InvalidState("session already started")),
        }
    }

    /// Valid from: `Deploying`.
    pub fn begin_video_handshake(&mut self) -> Result<()> {
        match self {
            Self::Deploying => {
                *self = Self::HandshakingVideo;
                Ok(())
            }
            _ => Err(MirrorError::InvalidState(
                "cannot open video tunnel: not in Deploying phase",
            )),
        }
    }

    /// Valid from: `HandshakingVideo`.
    pub fn begin_control_handshake(&mut self) -> Result<()> {
        match self {
            Self::HandshakingVideo => {
                *self = Self::HandshakingControl;
                Ok(())
            }
            _ => Err(MirrorError::InvalidState(
                "cannot open control tunnel: not in HandshakingVideo phase",
            )),
        }
    }

    /// Valid from: `HandshakingControl`.
    pub fn begin_streaming(&mut self) -> Result<()> {
        match self {
            Self::HandshakingControl => {
                *self = Self::Streaming {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(MirrorError::InvalidState(
                "cannot stream: not in HandshakingControl phase",
            )),
        }
    }

    /// Move to `Stopped` from any phase.
    pub fn stop(&mut self) {
        *self = Self::Stopped;
    }
}

// ── Tests ────────────────────────────────────────────────────────
