//! Application handshake of the capture service.
//!
//! ## Wire format (video tunnel, in order)
//!
//! ```text
//! dummy:        u8        (always 0x00, sent once the stream is ready)
//! device_name:  [u8; 64]  (UTF-8, NUL padded)
//! width:        u16 BE
//! height:       u16 BE
//! stream:       start-code delimited access units
//! ```

use crate::error::{MirrorError, Result};

pub const DUMMY_BYTE: u8 = 0x00;
pub const DEVICE_NAME_LEN: usize = 64;
pub const RESOLUTION_LEN: usize = 4;

/// Picture size reported by the capture service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u16,
    pub height: u16,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Device metadata read once during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub device_name: String,
    pub resolution: Resolution,
}

pub fn check_dummy_byte(bytes: &[u8]) -> Result<()> {
    match bytes {
        [DUMMY_BYTE] => Ok(()),
        [other] => Err(MirrorError::Protocol(format!(
            "expected dummy byte 0x00, got {other:#04x}"
        ))),
        _ => Err(MirrorError::Protocol(format!(
            "expected 1 dummy byte, got {}",
            bytes.len()
        ))),
    }
}

/// Decode the NUL-padded device name field.
pub fn parse_device_name(bytes: &[u8]) -> Result<String> {
    if bytes.len() != DEVICE_NAME_LEN {
        return Err(MirrorError::Protocol(format!(
            "device name field is {} bytes, expected {DEVICE_NAME_LEN}",
            bytes.len()
        )));
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|e| MirrorError::Protocol(format!("device name is not utf-8: {e}")))?;
    let name = text.trim_end_matches('\0');
    if name.is_empty() {
        return Err(MirrorError::Protocol("empty device name".into()));
    }
    Ok(name.to_string())
}

/// Decode two big-endian `u16`s: width then height.
pub fn parse_resolution(bytes: &[u8]) -> Result<Resolution> {
    match *bytes {
        [w0, w1, h0, h1] => Ok(Resolution {
            width: u16::from_be_bytes([w0, w1]),
            height: u16::from_be_bytes([h0, h1]),
        }),
        _ => Err(MirrorError::Protocol(format!(
            "resolution field is {} bytes, expected {RESOLUTION_LEN}",
            bytes.len()
        ))),
    }
}
