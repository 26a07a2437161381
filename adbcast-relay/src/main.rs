//! adbcast-relay entry point.
//!
//! ```text
//! adbcast-relay                     Mirror the configured device
//! adbcast-relay --device <serial>   Mirror another device
//! adbcast-relay --listen <addr>     Serve viewers on another address
//! adbcast-relay --config <path>     Load a custom config TOML
//! adbcast-relay --gen-config        Write default config to stdout
//! adbcast-relay --write-config <p>  Write default config to a file
//! ```
//!
//! The relay exits on Ctrl-C or when the device stops sending video.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use adbcast_core::DeviceSession;
use adbcast_relay::config::RelayConfig;
use adbcast_relay::viewer::ViewerServer;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "adbcast-relay", about = "Mirror an Android device to TCP viewers")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "adbcast-relay.toml")]
    config: PathBuf,

    /// ADB serial of the device, overriding the config file.
    #[arg(short, long)]
    device: Option<String>,

    /// Viewer listen address, overriding the config file.
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to this path and exit.
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&RelayConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // --write-config: same, into a file.
    if let Some(path) = cli.write_config {
        RelayConfig::write_default(&path)?;
        println!("wrote default config to {}", path.display());
        return Ok(());
    }

    let mut config = RelayConfig::load(&cli.config);
    if let Some(serial) = cli.device {
        config.device.serial = serial;
    }
    if let Some(listen) = cli.listen {
        config.viewer.listen = listen;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("adbcast-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("device: {}", config.device.serial);
    info!(
        "capture: max_size={} bit_rate={} max_fps={}",
        config.device.max_size, config.device.bit_rate, config.device.max_fps
    );

    let session = DeviceSession::with_options(
        config.device.serial.clone(),
        config.to_capture_params(),
        config.to_session_options(),
        Arc::new(config.to_deployer()),
    );

    let shutdown = CancellationToken::new();
    let viewers = ViewerServer::bind(
        config.viewer.listen,
        session.registry().clone(),
        config.viewer.queue_depth,
    )
    .await?;
    let listener = tokio::spawn(viewers.run(shutdown.clone()));

    // Ctrl-C handler.
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        ctrl_c.cancel();
    });

    let started = tokio::select! {
        result = session.start() => result,
        _ = shutdown.cancelled() => Ok(()),
    };
    if let Err(e) = started {
        error!("could not start session: {e}");
        shutdown.cancel();
        let _ = listener.await;
        return Err(e.into());
    }

    if session.is_streaming() {
        if let Some(name) = session.device_name() {
            info!(
                "streaming {name} at {}",
                session.resolution().map(|r| r.to_string()).unwrap_or_default()
            );
        }
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = session.stream_ended() => {
                info!("video stream ended, shutting down");
                session.registry().notify_and_close_all("video stream ended").await;
            }
        }
    }

    session.stop().await;
    shutdown.cancel();
    let _ = listener.await;
    if let Some(stats) = session.stats() {
        info!(units = stats.units(), bytes = stats.bytes(), "session summary");
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
