//! grrrrd: Grrrr peer-to-peer chat daemon.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use grrrr_core::config::GrrrrConfig;
use grrrr_services::{
    loss, Directory, FileDirectory, HistoryStore, MemoryDirectory, PeerCache, PeerRecord,
    TransferNode,
};

mod chat;
mod console;

/// Command-line overrides.
#[derive(Debug, Default, PartialEq, Eq)]
struct Flags {
    user: Option<String>,
    port: Option<u16>,
    udp_port: Option<u16>,
    debug: bool,
}

fn parse_flags(args: impl IntoIterator<Item = String>) -> Result<Flags> {
    let mut flags = Flags::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-user" => flags.user = Some(args.next().context("-user needs a name")?),
            "-port" => {
                let v = args.next().context("-port needs a number")?;
                flags.port = Some(v.parse::<u16>().with_context(|| format!("bad -port {v}"))?);
            }
            "-udpport" => {
                let v = args.next().context("-udpport needs a number")?;
                flags.udp_port = Some(v.parse::<u16>().with_context(|| format!("bad -udpport {v}"))?);
            }
            "-debug" => flags.debug = true,
            other => bail!("unknown argument {other}; usage: grrrrd -user NAME -port N -udpport N [-debug]"),
        }
    }
    Ok(flags)
}

fn apply_flags(config: &mut GrrrrConfig, flags: Flags) {
    if let Some(user) = flags.user {
        config.identity.username = user;
    }
    if let Some(port) = flags.port {
        config.network.stream_port = port;
    }
    if let Some(port) = flags.udp_port {
        config.network.datagram_port = port;
    }
    if flags.debug {
        config.debug.enabled = true;
    }
}

/// INFO by default, DEBUG with `-debug`. A non-empty `RUST_LOG` wins.
fn log_filter(debug: bool, env: Option<&str>) -> EnvFilter {
    let default = if debug { LevelFilter::DEBUG } else { LevelFilter::INFO };
    EnvFilter::builder()
        .with_default_directive(default.into())
        .parse_lossy(env.unwrap_or_default())
}

#[tokio::main]
async fn main() -> Result<()> {
    let flags = parse_flags(std::env::args().skip(1))?;

    // Load config before tracing so `-debug` can pick the log level
    let mut deferred = Vec::new();
    if let Err(e) = GrrrrConfig::write_default_if_missing() {
        deferred.push(format!("failed to write default config: {e}"));
    }
    let mut config = GrrrrConfig::load().unwrap_or_else(|e| {
        deferred.push(format!("failed to load config, using defaults: {e}"));
        GrrrrConfig::default()
    });
    apply_flags(&mut config, flags);

    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(config.debug.enabled, env.as_deref()))
        .init();
    for warning in deferred {
        tracing::warn!("{warning}");
    }

    config.validate().context("invalid configuration")?;

    let username = config.identity.username.clone();
    tracing::info!(user = %username, debug = config.debug.enabled, "grrrrd starting");

    // Bind sockets
    let host = config.network.host.clone();
    let udp = Arc::new(
        UdpSocket::bind((host.as_str(), config.network.datagram_port))
            .await
            .context("failed to bind datagram socket")?,
    );
    let tcp = TcpListener::bind((host.as_str(), config.network.stream_port))
        .await
        .context("failed to bind stream listener")?;

    // Directory
    let directory: Arc<dyn Directory> = if config.directory.peers.is_empty() {
        tracing::info!(path = %config.directory.path.display(), "using shared directory file");
        Arc::new(FileDirectory::new(config.directory.path.clone()))
    } else {
        Arc::new(MemoryDirectory::with_peers(&config.directory.peers))
    };
    if directory.lookup(&username)?.is_some() {
        tracing::warn!(user = %username, "name already registered, replacing entry");
    }
    directory
        .register(PeerRecord {
            name: username.clone(),
            host: host.clone(),
            stream_port: tcp.local_addr()?.port(),
            datagram_port: udp.local_addr()?.port(),
        })
        .context("failed to register in directory")?;

    // Shared state
    let history = HistoryStore::new();
    let peers = PeerCache::new();
    if let Err(e) = peers.refresh(directory.as_ref(), &username) {
        tracing::warn!(error = %e, "failed to load peer list");
    }

    let node = TransferNode::new(udp, config.transfer.clone(), history.clone())
        .with_loss(Arc::from(loss::from_config(&config.debug)));

    let chat_ctx = chat::ChatContext {
        own_name: username.clone(),
        history,
        peers,
        directory: directory.clone(),
    };

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    tokio::spawn(console::report_deliveries(node.subscribe_deliveries(), chat_ctx.peers.clone()));
    let receiver_task = tokio::spawn(node.clone().serve(shutdown_tx.subscribe()));
    let chat_task = tokio::spawn(chat::serve(tcp, chat_ctx.clone(), shutdown_tx.subscribe()));
    let console_task = tokio::spawn(console::Console::new(node, chat_ctx, shutdown_tx.clone()).run());

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = receiver_task       => tracing::error!("transfer receiver exited: {:?}", r),
        r = chat_task           => tracing::error!("chat listener exited: {:?}", r),
        r = console_task        => tracing::info!("console exited: {:?}", r),
    }
    let _ = shutdown_tx.send(());

    if let Err(e) = directory.deregister(&username) {
        tracing::warn!(error = %e, "failed to deregister");
    }

    // The stdin reader blocks a runtime thread until the next line.
    std::process::exit(0)
}
