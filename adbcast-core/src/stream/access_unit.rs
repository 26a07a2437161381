//! Start-code delimited video units.

use bytes::{BufMut, Bytes, BytesMut};

/// Annex-B start code that opens every unit.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// H.264 NAL unit type of an IDR slice.
const NAL_IDR: u8 = 5;
/// H.264 NAL unit type of a sequence parameter set.
const NAL_SPS: u8 = 7;

/// One demuxed unit of the video stream, always starting with [`START_CODE`].
///
/// Cloning is cheap: the bytes are reference counted and never mutated,
/// so every subscriber shares the same buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessUnit(Bytes);

impl AccessUnit {
    /// Build a unit from a chunk that may end with the next unit's start code.
    ///
    /// One trailing start code is stripped and a leading one is added.
    pub fn from_chunk(chunk: &[u8]) -> Self {
        let body = chunk.strip_suffix(&START_CODE).unwrap_or(chunk);
        let mut buf = BytesMut::with_capacity(START_CODE.len() + body.len());
        buf.put_slice(&START_CODE);
        buf.put_slice(body);
        Self(buf.freeze())
    }

    /// Wrap bytes that already carry the start code.
    ///
    /// Returns `None` when `bytes` does not begin with [`START_CODE`].
    pub fn from_bytes(bytes: Bytes) -> Option<Self> {
        bytes.starts_with(&START_CODE).then_some(Self(bytes))
    }

    /// The full unit, start code included.
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Total length including the start code.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when the unit carries no bytes after the start code.
    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    /// Bytes after the start code.
    pub fn payload(&self) -> &[u8] {
        &self.0[START_CODE.len()..]
    }

    /// H.264 `nal_unit_type` of the first payload byte.
    pub fn nal_type(&self) -> Option<u8> {
        self.payload().first().map(|b| b & 0x1f)
    }

    /// IDR slices and parameter sets, where a late joiner can start decoding.
    pub fn is_keyframe(&self) -> bool {
        matches!(self.nal_type(), Some(NAL_IDR) | Some(NAL_SPS))
    }
}

impl AsRef<[u8]> for AccessUnit {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for AccessUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessUnit")
            .field("len", &self.len())
            .field("nal_type", &self.nal_type())
            .finish()
    }
}
