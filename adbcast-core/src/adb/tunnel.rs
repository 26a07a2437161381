//! ADB-multiplexed byte-stream tunnel to a device-local socket.
//!
//! A [`TunnelSocket`] opens a TCP connection to the local ADB daemon,
//! selects the device with `host:transport:<serial>`, then asks the
//! daemon to open a named local socket on the device (for example
//! `localabstract:scrcpy`). After both `OKAY` replies the connection is
//! a plain duplex byte stream to the remote endpoint.
//!
//! The stream handle is only stored once the whole handshake succeeded,
//! so callers never observe a half-negotiated tunnel.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::adb::protocol::{self, AdbReply};
use crate::error::{MirrorError, Result};

// ── Constants ────────────────────────────────────────────────────

/// Per-attempt deadline for connecting and negotiating with the daemon.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause between two connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Number of connection attempts before giving up.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 300;

const READ_CHUNK: usize = 64 * 1024;

// ── RetryPolicy ──────────────────────────────────────────────────

/// Bounded retry schedule for [`TunnelSocket::connect_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Fixed sleep between two failed attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

// ── TunnelSocket ─────────────────────────────────────────────────

/// One tunnelled connection to a socket on the device.
#[derive(Debug)]
pub struct TunnelSocket {
    device_id: String,
    service: String,
    daemon_addr: SocketAddr,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    /// Bytes read from the stream but not yet handed to a caller.
    buf: BytesMut,
}

impl TunnelSocket {
    /// Create a disconnected tunnel to `service` on `device_id`.
    pub fn new(device_id: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            service: service.into(),
            daemon_addr: protocol::default_daemon_addr(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stream: None,
            buf: BytesMut::new(),
        }
    }

    /// Talk to a daemon at a non-default address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.daemon_addr = addr;
        self
    }

    /// Override the per-attempt connect deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn daemon_addr(&self) -> SocketAddr {
        self.daemon_addr
    }

    /// `true` once the handshake has completed and until [`disconnect`](Self::disconnect).
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the TCP connection and run the two-step tunnel handshake.
    ///
    /// On any failure the tunnel is left disconnected.
    pub async fn connect(&mut self) -> Result<()> {
        self.disconnect().await;

        let attempt = async {
            let stream = TcpStream::connect(self.daemon_addr).await?;
            stream.set_nodelay(true)?;
            self.handshake(stream).await
        };
        let stream = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| MirrorError::Timeout(self.connect_timeout))??;

        self.stream = Some(stream);
        Ok(())
    }

    /// Retry [`connect`](Self::connect) according to `policy`.
    ///
    /// Returns the number of attempts it took.
    pub async fn connect_with_retry(&mut self, policy: &RetryPolicy) -> Result<u32> {
        for attempt in 1..=policy.attempts {
            match self.connect().await {
                Ok(()) => {
                    debug!(
                        device = %self.device_id,
                        service = %self.service,
                        attempt,
                        "tunnel established"
                    );
                    return Ok(attempt);
                }
                Err(e) => {
                    debug!(
                        device = %self.device_id,
                        service = %self.service,
                        attempt,
                        error = %e,
                        "tunnel attempt failed"
                    );
                    self.disconnect().await;
                }
            }
            if attempt < policy.attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(MirrorError::ConnectionFailed {
            device_id: self.device_id.clone(),
            service: self.service.clone(),
            attempts: policy.attempts,
        })
    }

    /// Read exactly `n` bytes.
    pub async fn read_exactly(&mut self, n: usize) -> Result<Bytes> {
        while self.buf.len() < n {
            self.fill().await?;
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// Read up to and including the first occurrence of `marker`.
    ///
    /// If the stream closes first, fails with [`MirrorError::StreamEnd`]
    /// carrying the unterminated tail.
    pub async fn read_until(&mut self, marker: &[u8]) -> Result<Bytes> {
        if marker.is_empty() {
            return Ok(Bytes::new());
        }
        let mut searched = 0;
        loop {
            if let Some(pos) = find(&self.buf[searched..], marker) {
                let end = searched + pos + marker.len();
                return Ok(self.buf.split_to(end).freeze());
            }
            // A marker may straddle the old and new data.
            searched = self.buf.len().saturating_sub(marker.len() - 1);
            self.fill().await?;
        }
    }

    /// Write `data` and flush it.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(MirrorError::NotConnected)?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Close the connection and wait for the shutdown to finish.
    ///
    /// Safe to call on a tunnel that is already closed or was never opened.
    pub async fn disconnect(&mut self) {
        self.buf.clear();
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        match stream.shutdown().await {
            Ok(()) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotConnected
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::BrokenPipe
                ) => {}
            Err(e) => debug!(service = %self.service, "tunnel shutdown: {e}"),
        }
        info!(device = %self.device_id, service = %self.service, "tunnel closed");
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn handshake(&self, mut stream: TcpStream) -> Result<TcpStream> {
        Self::request(&mut stream, &protocol::transport_command(&self.device_id)).await?;
        Self::request(&mut stream, &self.service).await?;
        Ok(stream)
    }

    /// Send one command and require `OKAY` back.
    async fn request(stream: &mut TcpStream, command: &str) -> Result<()> {
        let frame = protocol::encode_command(command)?;
        stream.write_all(&frame).await?;

        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).await?;
        match AdbReply::parse(reply)? {
            AdbReply::Okay => Ok(()),
            AdbReply::Fail => Err(MirrorError::AdbFailure {
                command: command.to_string(),
            }),
        }
    }

    /// Pull more bytes from the stream into the buffer.
    async fn fill(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(MirrorError::NotConnected)?;
        self.buf.reserve(READ_CHUNK);
        let read = stream.read_buf(&mut self.buf).await?;
        if read == 0 {
            return Err(MirrorError::StreamEnd {
                partial: self.buf.split().freeze(),
            });
        }
        Ok(())
    }
}

/// Open a tunnel to `service` on `device_id`, retrying per `policy`.
pub async fn open_tunnel(
    device_id: &str,
    service: &str,
    daemon_addr: SocketAddr,
    policy: &RetryPolicy,
) -> Result<TunnelSocket> {
    let mut socket = TunnelSocket::new(device_id, service).with_addr(daemon_addr);
    socket.connect_with_retry(policy).await?;
    Ok(socket)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::net::TcpListener;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    const SERVICE: &str = "localabstract:scrcpy";

    async fn read_command(stream: &mut TcpStream) -> String {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let len = usize::from_str_radix(std::str::from_utf8(&len).unwrap(), 16).unwrap();
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        String::from_utf8(payload).unwrap()
    }

    /// Accept one connection, answer both commands, then write `tail`.
    async fn one_shot_daemon(replies: [&'static [u8; 4]; 2], tail: Vec<u8>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            assert_eq!(read_command(&mut stream).await, "host:transport:dev-1");
            stream.write_all(replies[0]).await.unwrap();
            if replies[0] != b"OKAY" {
                return;
            }
            assert_eq!(read_command(&mut stream).await, SERVICE);
            stream.write_all(replies[1]).await.unwrap();
            stream.write_all(&tail).await.unwrap();
        });
        addr
    }

    /// Accept connections forever; reply `FAIL` until attempt `succeed_on`.
    async fn counting_daemon(succeed_on: Option<u32>) -> (SocketAddr, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&count);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(async move {
                    let _ = read_command(&mut stream).await;
                    if succeed_on == Some(n) {
                        stream.write_all(b"OKAY").await.unwrap();
                        let _ = read_command(&mut stream).await;
                        stream.write_all(b"OKAY").await.unwrap();
                        // Hold the tunnel open for the client.
                        let mut sink = [0u8; 1];
                        let _ = stream.read(&mut sink).await;
                    } else {
                        let _ = stream.write_all(b"FAIL").await;
                    }
                });
            }
        });
        (addr, count)
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn handshake_then_reads() {
        let addr = one_shot_daemon([b"OKAY", b"OKAY"], b"\x00ab\x00\x00\x00\x01cd".to_vec()).await;
        let mut socket = TunnelSocket::new("dev-1", SERVICE).with_addr(addr);

        assert_ok!(socket.connect().await);
        assert!(socket.is_connected());

        assert_eq!(&socket.read_exactly(1).await.unwrap()[..], b"\x00");
        let chunk = socket.read_until(b"\x00\x00\x00\x01").await.unwrap();
        assert_eq!(&chunk[..], b"ab\x00\x00\x00\x01");

        // "cd" is never terminated before the daemon hangs up.
        match socket.read_until(b"\x00\x00\x00\x01").await {
            Err(MirrorError::StreamEnd { partial }) => assert_eq!(&partial[..], b"cd"),
            other => panic!("expected StreamEnd, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fail_on_second_step_leaves_no_handle() {
        let addr = one_shot_daemon([b"OKAY", b"FAIL"], Vec::new()).await;
        let mut socket = TunnelSocket::new("dev-1", SERVICE).with_addr(addr);

        let err = socket.connect().await.unwrap_err();
        assert!(matches!(err, MirrorError::AdbFailure { ref command } if command == SERVICE));
        assert!(!socket.is_connected());
        assert!(matches!(
            socket.read_exactly(1).await,
            Err(MirrorError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn malformed_reply_is_rejected() {
        let addr = one_shot_daemon([b"WHAT", b"OKAY"], Vec::new()).await;
        let mut socket = TunnelSocket::new("dev-1", SERVICE).with_addr(addr);

        let err = socket.connect().await.unwrap_err();
        assert!(matches!(err, MirrorError::MalformedReply(bytes) if &bytes == b"WHAT"));
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn read_until_spans_fragmented_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_command(&mut stream).await;
            stream.write_all(b"OKAY").await.unwrap();
            read_command(&mut stream).await;
            stream.write_all(b"OKAY").await.unwrap();
            for piece in [&b"xy\x00"[..], &b"\x00"[..], &b"\x00\x01z"[..]] {
                stream.write_all(piece).await.unwrap();
                stream.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let mut socket = TunnelSocket::new("dev-1", SERVICE).with_addr(addr);
        socket.connect().await.unwrap();
        let chunk = socket.read_until(b"\x00\x00\x00\x01").await.unwrap();
        assert_eq!(&chunk[..], b"xy\x00\x00\x00\x01");
        assert_eq!(&socket.read_exactly(1).await.unwrap()[..], b"z");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let addr = one_shot_daemon([b"OKAY", b"OKAY"], Vec::new()).await;
        let mut socket = TunnelSocket::new("dev-1", SERVICE).with_addr(addr);
        socket.connect().await.unwrap();

        socket.disconnect().await;
        assert!(!socket.is_connected());
        socket.disconnect().await;
        assert!(!socket.is_connected());
        assert!(matches!(
            socket.write_all(b"x").await,
            Err(MirrorError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn retry_makes_exactly_the_configured_attempts() {
        let (addr, count) = counting_daemon(None).await;
        let mut socket = TunnelSocket::new("dev-1", SERVICE).with_addr(addr);

        let err = assert_err!(socket.connect_with_retry(&fast_policy(5)).await);
        match err {
            MirrorError::ConnectionFailed {
                device_id,
                service,
                attempts,
            } => {
                assert_eq!(device_id, "dev-1");
                assert_eq!(service, SERVICE);
                assert_eq!(attempts, 5);
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn retry_stops_at_first_success() {
        let (addr, count) = counting_daemon(Some(3)).await;
        let mut socket = TunnelSocket::new("dev-1", SERVICE).with_addr(addr);

        let attempts = socket.connect_with_retry(&fast_policy(10)).await.unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(socket.is_connected());
    }

    #[tokio::test]
    async fn refused_connection_exhausts_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = open_tunnel("dev-1", SERVICE, addr, &fast_policy(3))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::ConnectionFailed { attempts: 3, .. }));
    }

    #[test]
    fn default_policy_matches_reference_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 300);
        assert_eq!(policy.interval, Duration::from_millis(10));
    }
}
