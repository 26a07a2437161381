//! # stream: video elementary stream handling
//!
//! The capture service writes an Annex-B style H.264 stream: every unit
//! starts with the 4-byte start code `00 00 00 01`. The demuxer cuts the
//! byte stream at each start code and hands out [`AccessUnit`]s that the
//! controller broadcasts unchanged.

pub mod access_unit;
pub mod demux;

// ── Re-exports ───────────────────────────────────────────────────

pub use access_unit::{AccessUnit, START_CODE};
pub use demux::StreamDemuxer;
