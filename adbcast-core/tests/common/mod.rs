//! Shared fixtures: a scripted ADB daemon and a counting deployer.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use adbcast_core::{
    CaptureParams, Deployer, DeploymentHandle, MirrorError, Result, SessionOptions, START_CODE,
};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

// ── Scripted daemon ──────────────────────────────────────────────

/// What the daemon does on one accepted connection.
#[derive(Clone)]
pub struct Script {
    /// Replies to the transport and service commands.
    pub replies: [&'static [u8; 4]; 2],
    /// Written right after a successful handshake.
    pub payload: Vec<u8>,
    /// Keep the connection open until the client hangs up.
    pub hold: bool,
}

impl Script {
    pub fn okay(payload: Vec<u8>, hold: bool) -> Self {
        Self {
            replies: [b"OKAY", b"OKAY"],
            payload,
            hold,
        }
    }
}

/// Bytes a connection received after its handshake, reported at EOF.
pub type Received = mpsc::UnboundedReceiver<(usize, Vec<u8>)>;

/// Serve every accepted connection with `script(index)`.
pub async fn daemon<F>(script: F) -> (SocketAddr, Received)
where
    F: Fn(usize) -> Script + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((mut sock, _)) = listener.accept().await {
            let script = script(index);
            let tx = tx.clone();
            let conn = index;
            index += 1;
            tokio::spawn(async move {
                for reply in script.replies {
                    let mut len = [0u8; 4];
                    if sock.read_exact(&mut len).await.is_err() {
                        return;
                    }
                    let n = usize::from_str_radix(std::str::from_utf8(&len).unwrap(), 16).unwrap();
                    let mut cmd = vec![0u8; n];
                    if sock.read_exact(&mut cmd).await.is_err() {
                        return;
                    }
                    if sock.write_all(reply).await.is_err() || reply != b"OKAY" {
                        return;
                    }
                }
                let _ = sock.write_all(&script.payload).await;
                if script.hold {
                    let mut received = Vec::new();
                    let _ = sock.read_to_end(&mut received).await;
                    let _ = tx.send((conn, received));
                }
            });
        }
    });
    (addr, rx)
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

// ── Capture service wire data ────────────────────────────────────

pub fn device_name_field(name: &str) -> Vec<u8> {
    let mut field = name.as_bytes().to_vec();
    field.resize(64, 0);
    field
}

/// Dummy byte, device name and resolution as the video tunnel sends them.
pub fn handshake_bytes(name: &str, width: u16, height: u16) -> Vec<u8> {
    let mut out = vec![0x00];
    out.extend(device_name_field(name));
    out.extend(width.to_be_bytes());
    out.extend(height.to_be_bytes());
    out
}

/// `payloads` as start-code delimited units.
pub fn annex_b(payloads: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for payload in payloads {
        out.extend(START_CODE);
        out.extend_from_slice(payload);
    }
    out
}

pub fn unit(payload: &[u8]) -> Vec<u8> {
    annex_b(&[payload])
}

pub fn options(addr: SocketAddr) -> SessionOptions {
    SessionOptions {
        daemon_addr: addr,
        retry_interval: Duration::from_millis(5),
        attempt_timeout: Duration::from_millis(500),
        ..SessionOptions::default()
    }
}

pub fn params(attempts: u32) -> CaptureParams {
    CaptureParams {
        connect_timeout: attempts,
        ..CaptureParams::default()
    }
}

// ── Counting deployer ────────────────────────────────────────────

#[derive(Default)]
pub struct Counters {
    pub deployed: AtomicUsize,
    pub terminated: AtomicUsize,
}

impl Counters {
    pub fn deployed(&self) -> usize {
        self.deployed.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

pub struct MockDeployer {
    pub counters: Arc<Counters>,
    pub fail: bool,
}

impl MockDeployer {
    pub fn new(fail: bool) -> (Arc<Self>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let deployer = Arc::new(Self {
            counters: counters.clone(),
            fail,
        });
        (deployer, counters)
    }
}

#[async_trait]
impl Deployer for MockDeployer {
    async fn deploy(
        &self,
        _device_id: &str,
        _params: &CaptureParams,
    ) -> Result<Box<dyn DeploymentHandle>> {
        self.counters.deployed.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MirrorError::Deployment("unexpected startup output \"Aborted\"".into()));
        }
        Ok(Box::new(MockDeployment(self.counters.clone())))
    }
}

struct MockDeployment(Arc<Counters>);

#[async_trait]
impl DeploymentHandle for MockDeployment {
    async fn terminate(&mut self) -> Result<()> {
        self.0.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
