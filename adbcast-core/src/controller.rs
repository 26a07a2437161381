//! Background demux/broadcast loop of a streaming session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::adb::TunnelSocket;
use crate::registry::SubscriberRegistry;
use crate::stream::StreamDemuxer;

// ── StreamStats ──────────────────────────────────────────────────

/// Counters of the broadcast loop, readable while it runs.
#[derive(Debug, Default)]
pub struct StreamStats {
    units: AtomicU64,
    bytes: AtomicU64,
    deliveries: AtomicU64,
}

impl StreamStats {
    /// Access units read off the video tunnel.
    pub fn units(&self) -> u64 {
        self.units.load(Ordering::Relaxed)
    }

    /// Bytes of those access units, start codes included.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Successful unit deliveries summed over all subscribers.
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    fn record(&self, len: usize, delivered: usize) {
        self.units.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
    }
}

// ── StreamController ─────────────────────────────────────────────

/// Owns the spawned loop that reads access units and broadcasts them.
///
/// The loop stops when the video tunnel ends, on a read error, or when
/// [`shutdown`](Self::shutdown) cancels it. Dropping the controller
/// cancels the loop as well.
pub struct StreamController {
    cancel: CancellationToken,
    /// Cancelled by the loop itself when it exits, for whatever reason.
    done: CancellationToken,
    _guard: DropGuard,
    handle: JoinHandle<TunnelSocket>,
    stats: Arc<StreamStats>,
}

impl StreamController {
    pub fn spawn(demuxer: StreamDemuxer, registry: SubscriberRegistry) -> Self {
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let stats = Arc::new(StreamStats::default());
        let handle = tokio::spawn(run(
            demuxer,
            registry,
            cancel.clone(),
            done.clone().drop_guard(),
            stats.clone(),
        ));
        Self {
            _guard: cancel.clone().drop_guard(),
            cancel,
            done,
            handle,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Token cancelled once the loop has exited, e.g. because the device
    /// stopped sending video.
    pub fn finished(&self) -> CancellationToken {
        self.done.clone()
    }

    /// `false` once the loop has exited on its own or been cancelled.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the loop and wait for it.
    ///
    /// Returns the video tunnel so the caller can disconnect it, or `None`
    /// when the task panicked. Never fails.
    pub async fn shutdown(self) -> Option<TunnelSocket> {
        self.cancel.cancel();
        match self.handle.await {
            Ok(socket) => Some(socket),
            Err(e) if e.is_cancelled() => {
                debug!("stream loop cancelled before completion");
                None
            }
            Err(e) => {
                error!("stream loop panicked: {e}");
                None
            }
        }
    }
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("running", &self.is_running())
            .field("stats", &self.stats)
            .finish()
    }
}

async fn run(
    mut demuxer: StreamDemuxer,
    registry: SubscriberRegistry,
    cancel: CancellationToken,
    _done: DropGuard,
    stats: Arc<StreamStats>,
) -> TunnelSocket {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("stream loop cancelled");
                break;
            }
            next = demuxer.next_unit() => next,
        };

        let unit = match next {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                info!(units = stats.units(), "video stream ended");
                break;
            }
            Err(e) => {
                warn!("video stream read failed: {e}");
                break;
            }
        };

        let len = unit.len();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("stream loop cancelled during broadcast");
                break;
            }
            delivered = registry.broadcast(&unit) => stats.record(len, delivered),
        }
    }
    demuxer.into_inner()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ChannelSubscriber, SubscriberMessage};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// ADB daemon stand-in: handshake OKAYs, then `video`, then holds the
    /// connection open until the client hangs up.
    async fn video_daemon(video: &'static [u8], hold: bool) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            for _ in 0..2 {
                let mut len = [0u8; 4];
                sock.read_exact(&mut len).await.unwrap();
                let n = usize::from_str_radix(std::str::from_utf8(&len).unwrap(), 16).unwrap();
                let mut cmd = vec![0u8; n];
                sock.read_exact(&mut cmd).await.unwrap();
                sock.write_all(b"OKAY").await.unwrap();
            }
            sock.write_all(video).await.unwrap();
            if hold {
                let mut sink = [0u8; 16];
                let _ = sock.read(&mut sink).await;
            }
        });
        addr
    }

    async fn connected_demuxer(addr: std::net::SocketAddr) -> StreamDemuxer {
        let mut socket = TunnelSocket::new("dev", "localabstract:scrcpy").with_addr(addr);
        socket.connect().await.unwrap();
        StreamDemuxer::new(socket)
    }

    #[tokio::test]
    async fn broadcasts_until_end_of_stream() {
        let addr = video_daemon(b"\x00\x00\x00\x01\x65AA\x00\x00\x00\x01\x41BB", false).await;
        let registry = SubscriberRegistry::new();
        let (sub, mut rx) = ChannelSubscriber::channel(8);
        registry.add(Arc::new(sub));

        let controller = StreamController::spawn(connected_demuxer(addr).await, registry);
        let stats = controller.stats();

        for expected in [&b"\x00\x00\x00\x01\x65AA"[..], &b"\x00\x00\x00\x01\x41BB"[..]] {
            match rx.recv().await {
                Some(SubscriberMessage::Binary(unit)) => assert_eq!(unit.as_ref(), expected),
                other => panic!("unexpected {other:?}"),
            }
        }

        let socket = controller.shutdown().await.unwrap();
        assert_eq!(stats.units(), 2);
        assert_eq!(stats.bytes(), 14);
        assert_eq!(stats.deliveries(), 2);
        assert_eq!(socket.service(), "localabstract:scrcpy");
    }

    #[tokio::test]
    async fn shutdown_cancels_a_blocked_read() {
        let addr = video_daemon(b"\x00\x00\x00\x01\x65partial", true).await;
        let controller =
            StreamController::spawn(connected_demuxer(addr).await, SubscriberRegistry::new());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(controller.is_running());
        let finished = controller.finished();
        assert!(!finished.is_cancelled());

        let mut socket = tokio::time::timeout(Duration::from_secs(2), controller.shutdown())
            .await
            .expect("shutdown must not hang")
            .unwrap();
        assert!(finished.is_cancelled());
        assert!(socket.is_connected());
        socket.disconnect().await;
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn loop_exits_on_its_own_when_stream_ends() {
        let addr = video_daemon(b"", false).await;
        let controller =
            StreamController::spawn(connected_demuxer(addr).await, SubscriberRegistry::new());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while controller.is_running() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!controller.is_running());
        assert!(controller.finished().is_cancelled());
        assert_eq!(controller.stats().units(), 0);
        assert!(controller.shutdown().await.is_some());
    }
}
