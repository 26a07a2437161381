//! Start-code demuxer over the video tunnel.

use futures::Stream;
use tracing::trace;

use crate::adb::TunnelSocket;
use crate::error::{MirrorError, Result};
use crate::stream::access_unit::{AccessUnit, START_CODE};

/// Cuts the video byte stream into [`AccessUnit`]s.
///
/// Each `read_until(START_CODE)` returns the rest of the current unit
/// followed by the start code of the next one. The demuxer strips that
/// trailing start code and puts it back at the front, so every yielded
/// unit begins with `00 00 00 01`.
///
/// Empty units are never yielded, which absorbs the bare start code that
/// opens the stream. When the stream ends, the bytes after the last start
/// code are flushed as the final unit.
#[derive(Debug)]
pub struct StreamDemuxer {
    socket: TunnelSocket,
    finished: bool,
}

impl StreamDemuxer {
    pub fn new(socket: TunnelSocket) -> Self {
        Self {
            socket,
            finished: false,
        }
    }

    /// Next unit, or `Ok(None)` once the stream has ended.
    ///
    /// Cancel-safe: dropping the future loses no buffered bytes.
    pub async fn next_unit(&mut self) -> Result<Option<AccessUnit>> {
        while !self.finished {
            match self.socket.read_until(&START_CODE).await {
                Ok(chunk) => {
                    let unit = AccessUnit::from_chunk(&chunk);
                    if unit.is_empty() {
                        continue;
                    }
                    trace!(len = unit.len(), nal_type = ?unit.nal_type(), "access unit");
                    return Ok(Some(unit));
                }
                Err(MirrorError::StreamEnd { partial }) => {
                    self.finished = true;
                    let unit = AccessUnit::from_chunk(&partial);
                    if !unit.is_empty() {
                        return Ok(Some(unit));
                    }
                }
                Err(e) if e.is_stream_end() => {
                    self.finished = true;
                }
                Err(e) => {
                    self.finished = true;
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    /// `true` once end of stream or a read error has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The unit sequence as a `Stream`; it ends after end of stream or
    /// after yielding the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<AccessUnit>> {
        futures::stream::unfold(self, |mut demuxer| async move {
            match demuxer.next_unit().await {
                Ok(Some(unit)) => Some((Ok(unit), demuxer)),
                Ok(None) => None,
                Err(e) => Some((Err(e), demuxer)),
            }
        })
    }

    /// Hand the tunnel back, e.g. to disconnect it.
    pub fn into_inner(self) -> TunnelSocket {
        self.socket
    }
}
