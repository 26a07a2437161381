//! # adb: host-side client for the ADB daemon
//!
//! Only the subset of the host protocol needed to reach a socket on the
//! device: length-prefixed commands, `OKAY`/`FAIL` replies, and the
//! `host:transport:` + local-socket tunnel.
//!
//! | Module     | Purpose                                         |
//! |------------|-------------------------------------------------|
//! | `protocol` | Command framing and reply parsing               |
//! | `tunnel`   | `TunnelSocket` byte stream and the retry policy |

pub mod protocol;
pub mod tunnel;

// ── Re-exports ───────────────────────────────────────────────────

pub use protocol::{AdbReply, decode_command, encode_command};
pub use tunnel::{RetryPolicy, TunnelSocket, open_tunnel};
