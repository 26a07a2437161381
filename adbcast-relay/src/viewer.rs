//! TCP viewers: every connection becomes a subscriber of the session.
//!
//! ## Wire format (relay → viewer)
//!
//! ```text
//! ┌──────────┬──────────────┬─────────────────────┐
//! │ tag (u8) │ len (u32 BE) │ payload (len bytes) │
//! └──────────┴──────────────┴─────────────────────┘
//!   0 = access unit (start code included)
//!   1 = UTF-8 text notice
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Encoder, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use adbcast_core::{ChannelSubscriber, SubscriberId, SubscriberMessage, SubscriberRegistry};

pub const TAG_BINARY: u8 = 0;
pub const TAG_TEXT: u8 = 1;
pub const FRAME_HEADER_LEN: usize = 5;

// ── Codec ────────────────────────────────────────────────────────

/// Frames [`SubscriberMessage`]s for viewers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ViewerCodec;

impl Encoder<SubscriberMessage> for ViewerCodec {
    type Error = io::Error;

    fn encode(&mut self, item: SubscriberMessage, dst: &mut BytesMut) -> io::Result<()> {
        let (tag, payload): (u8, &[u8]) = match &item {
            SubscriberMessage::Binary(unit) => (TAG_BINARY, unit.as_ref()),
            SubscriberMessage::Text(text) => (TAG_TEXT, text.as_bytes()),
        };
        let len = u32::try_from(payload.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("viewer frame of {} bytes is too large", payload.len()),
            )
        })?;
        dst.reserve(FRAME_HEADER_LEN + payload.len());
        dst.put_u8(tag);
        dst.put_u32(len);
        dst.put_slice(payload);
        Ok(())
    }
}

// ── ViewerServer ─────────────────────────────────────────────────

/// Accepts viewers and registers each one with the session's registry.
pub struct ViewerServer {
    listener: TcpListener,
    registry: SubscriberRegistry,
    queue_depth: usize,
}

impl ViewerServer {
    pub async fn bind(
        addr: SocketAddr,
        registry: SubscriberRegistry,
        queue_depth: usize,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry,
            queue_depth,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept viewers until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        if let Ok(addr) = self.local_addr() {
            info!("viewer listener on {addr}");
        }
        loop {
            let accept = tokio::select! {
                result = self.listener.accept() => result,
                _ = cancel.cancelled() => break,
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, "set_nodelay: {e}");
            }

            let (subscriber, rx) = ChannelSubscriber::channel(self.queue_depth);
            let id = self.registry.add(Arc::new(subscriber));
            info!(%peer, viewer = %id, "viewer connected");
            tokio::spawn(serve_viewer(stream, peer, id, rx, self.registry.clone()));
        }
        info!("viewer listener stopped");
    }
}

/// Forward queued messages to one viewer until either side goes away.
async fn serve_viewer(
    stream: TcpStream,
    peer: SocketAddr,
    id: SubscriberId,
    mut rx: mpsc::Receiver<SubscriberMessage>,
    registry: SubscriberRegistry,
) {
    let (mut reader, writer) = stream.into_split();
    let mut sink = FramedWrite::new(writer, ViewerCodec);
    let mut scratch = [0u8; 256];

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    debug!(viewer = %id, "subscriber closed");
                    break;
                };
                if let Err(e) = sink.send(message).await {
                    debug!(viewer = %id, "write failed: {e}");
                    break;
                }
            }
            read = reader.read(&mut scratch) => match read {
                // Viewers have nothing to say; anything but EOF is ignored.
                Ok(n) if n > 0 => {}
                _ => break,
            },
        }
    }

    registry.remove(id);
    info!(%peer, viewer = %id, "viewer disconnected");
}

// ── Tests ────────────────────────────────────────────────────────
