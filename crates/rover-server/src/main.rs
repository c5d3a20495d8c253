//! FileRover server entry point.
//!
//! Shares one directory tree with one client at a time.
//!
//! # Usage
//!
//! ```text
//! rover-server [OPTIONS]
//!
//! Options:
//!   --root <DIR>            Directory to share [default: from config, else .]
//!   --config <FILE>         Config file [default: platform config dir]
//!   --bind <IP>             Address both listeners bind to
//!   --port <PORT>           Control port
//!   --transfer-port <PORT>  Transfer port
//!   --no-multicast          Do not send discovery heartbeats
//!   --write-config          Save the effective config and exit
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config() + CLI overrides
//!  └─ SandboxGateway::new(root)
//!  └─ TransferEngine<ListenChannel>   -- one transfer at a time on the transfer port
//!  └─ HeartbeatAnnouncer              -- multicast thread (optional)
//!  └─ ControlServer::run()            -- blocking accept loop on a blocking task
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use rover_core::{SandboxGateway, TransferEngine};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rover_server::infrastructure::network::control::ControlServer;
use rover_server::infrastructure::network::discovery::{
    detect_outward_ipv4, HeartbeatAnnouncer, HeartbeatSettings,
};
use rover_server::infrastructure::network::transfer::ListenChannel;
use rover_server::infrastructure::storage::config::{
    config_file_path, load_config, save_config, ServerConfig,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// FileRover server.
///
/// Command-line values override the config file.
#[derive(Debug, Parser)]
#[command(
    name = "rover-server",
    about = "Share a directory tree over the FileRover protocol",
    version
)]
struct Cli {
    /// Directory to share.
    #[arg(long, env = "ROVER_ROOT")]
    root: Option<PathBuf>,

    /// Config file to read instead of the platform default.
    #[arg(long, env = "ROVER_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Address the control and transfer listeners bind to.
    #[arg(long, env = "ROVER_BIND")]
    bind: Option<String>,

    /// Control port.
    #[arg(long)]
    port: Option<u16>,

    /// Transfer port.
    #[arg(long)]
    transfer_port: Option<u16>,

    /// Do not send multicast discovery heartbeats.
    #[arg(long)]
    no_multicast: bool,

    /// Write the effective configuration to the config file and exit.
    #[arg(long)]
    write_config: bool,
}

impl Cli {
    fn apply(&self, cfg: &mut ServerConfig) {
        if let Some(root) = &self.root {
            cfg.server.root = root.clone();
        }
        if let Some(bind) = &self.bind {
            cfg.network.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            cfg.network.control_port = port;
        }
        if let Some(port) = self.transfer_port {
            cfg.network.transfer_port = port;
        }
        if self.no_multicast {
            cfg.discovery.enabled = false;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_deref()).context("failed to load server config")?;
    cli.apply(&mut cfg);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.server.log_level)),
        )
        .init();

    if cli.write_config {
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => config_file_path().context("no config file location")?,
        };
        save_config(&cfg, &path).with_context(|| format!("failed to write {}", path.display()))?;
        info!("configuration written to {}", path.display());
        return Ok(());
    }

    info!("FileRover server starting");

    let gateway = SandboxGateway::new(&cfg.server.root)
        .with_context(|| format!("cannot share {}", cfg.server.root.display()))?;
    info!("sharing {}", gateway.root().display());

    let bind_ip = cfg.network.bind_ip()?;
    let engine = TransferEngine::new(ListenChannel::new(
        bind_ip,
        cfg.network.transfer_port,
        cfg.network.accept_timeout(),
    ));
    let mut server = ControlServer::bind(
        SocketAddr::new(bind_ip, cfg.network.control_port),
        gateway,
        engine.clone(),
    )?
    .with_marker_timeout(cfg.network.negotiation_timeout());

    // ── Discovery heartbeat ───────────────────────────────────────────────────
    let heartbeat = if cfg.discovery.enabled {
        let group = cfg.discovery.group()?;
        let advertise = match cfg.discovery.advertise_ip()? {
            Some(ip) => ip,
            None => advertised_default(bind_ip, group),
        };
        match HeartbeatAnnouncer::start(HeartbeatSettings {
            group,
            interval: cfg.discovery.heartbeat_interval(),
            ttl: cfg.discovery.multicast_ttl,
            advertise,
        }) {
            Ok(announcer) => Some(announcer),
            Err(e) => {
                error!("discovery heartbeat disabled: {e}");
                None
            }
        }
    } else {
        info!("discovery heartbeat disabled by configuration");
        None
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("FileRover server ready.  Press Ctrl-C to exit.");

    let serve_flag = Arc::clone(&running);
    tokio::task::spawn_blocking(move || server.run(&serve_flag))
        .await
        .context("control loop panicked")??;

    if let Some(announcer) = heartbeat {
        announcer.stop();
    }
    if !engine.wait_idle(cfg.network.accept_timeout()) {
        warn!("exiting with {} transfer(s) unfinished", engine.pending_len() + 1);
    }

    info!("FileRover server stopped");
    Ok(())
}

/// Picks the heartbeat payload when none is configured: the bind address if
/// it is a concrete IPv4 address, else the outward address towards the group.
fn advertised_default(bind_ip: IpAddr, group: std::net::SocketAddrV4) -> Ipv4Addr {
    match bind_ip {
        IpAddr::V4(ip) if !ip.is_unspecified() => ip,
        _ => detect_outward_ipv4(group).unwrap_or_else(|| {
            warn!("could not detect outward address; announcing loopback");
            Ipv4Addr::LOCALHOST
        }),
    }
}
