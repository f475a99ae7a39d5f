//! Stream chat path: one JSON message per TCP connection, one reply back.
//!
//! Frame: u32 big-endian length, then that many bytes of JSON.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use grrrr_core::message::{ChatMessage, Reply};
use grrrr_services::{Directory, HistoryStore, PeerCache};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(300);
const READ_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_FRAME: usize = 64 * 1024;

/// What the listener needs to handle an incoming message.
#[derive(Clone)]
pub struct ChatContext {
    pub own_name: String,
    pub history: HistoryStore,
    pub peers: PeerCache,
    pub directory: Arc<dyn Directory>,
}

// ── Framing ──────────────────────────────────────────────────────────────────

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value).context("failed to encode frame")?;
    if body.len() > MAX_FRAME {
        bail!("frame of {} bytes exceeds limit", body.len());
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await.context("failed to read frame length")? as usize;
    if len > MAX_FRAME {
        bail!("frame of {len} bytes exceeds limit");
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.context("truncated frame")?;
    serde_json::from_slice(&body).context("failed to decode frame")
}

// ── Listener ─────────────────────────────────────────────────────────────────

/// Accept chat connections until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    ctx: ChatContext,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "chat listener started");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("chat listener shutting down");
                return Ok(());
            }

            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, &ctx).await {
                        tracing::debug!(peer = %peer, error = %e, "chat connection failed");
                    }
                });
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, ctx: &ChatContext) -> Result<()> {
    let message: ChatMessage = timeout(READ_TIMEOUT, read_frame(&mut stream))
        .await
        .context("timed out waiting for message")??;
    tracing::debug!(peer = %peer, from = %message.from, broadcast = message.broadcast, "chat message received");

    if message.broadcast {
        println!("[broadcast] {}: {}", message.from, message.text);
    } else {
        println!("[{}] {}", message.from, message.text);
    }

    if !ctx.peers.contains(&message.from) {
        if let Err(e) = ctx.peers.refresh(ctx.directory.as_ref(), &ctx.own_name) {
            tracing::warn!(error = %e, "failed to refresh peer cache");
        }
    }
    ctx.history.add(message);

    write_frame(&mut stream, &Reply::ok()).await
}

// ── Sender ───────────────────────────────────────────────────────────────────

/// Send one message and wait for the reply.
pub async fn send_message(addr: SocketAddr, message: &ChatMessage) -> Result<Reply> {
    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .context("connect timed out")?
        .with_context(|| format!("failed to connect to {addr}"))?;
    write_frame(&mut stream, message).await?;
    timeout(READ_TIMEOUT, read_frame(&mut stream))
        .await
        .context("timed out waiting for reply")?
}

/// Send `message` to the cached peer `name`. Peers that cannot be reached
/// are dropped from the cache.
pub async fn deliver(peers: &PeerCache, name: &str, message: &ChatMessage) -> bool {
    let Some(record) = peers.get(name) else {
        println!("[System] {name} is not in the peer list, try \"list\"");
        return false;
    };

    let result = match record.stream_addr() {
        Ok(addr) => send_message(addr, message).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(reply) => {
            if !message.broadcast && reply.is_ok() {
                println!("[System] {name} has received your private message.");
            }
            true
        }
        Err(e) => {
            tracing::debug!(peer = %name, error = %e, "chat send failed");
            println!("[System] issue occurred when sending message to {name}");
            peers.remove(name);
            false
        }
    }
}

/// Send `message` to every cached peer concurrently.
pub async fn broadcast_message(peers: &PeerCache, message: &ChatMessage) -> usize {
    let tasks: Vec<_> = peers
        .all()
        .into_iter()
        .map(|record| {
            let peers = peers.clone();
            let message = message.clone();
            tokio::spawn(async move { deliver(&peers, &record.name, &message).await })
        })
        .collect();

    let mut delivered = 0;
    for task in tasks {
        if matches!(task.await, Ok(true)) {
            delivered += 1;
        }
    }
    delivered
}
