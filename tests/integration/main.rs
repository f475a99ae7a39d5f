//! Grrrr integration test harness.
//!
//! Every test runs two or more in-process nodes, each with its own UDP
//! socket on 127.0.0.1 and its own receive loop. No root, no namespaces.
//!
//!   cargo test --test integration

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use grrrr_core::config::TransferConfig;
use grrrr_core::message::ChatMessage;
use grrrr_services::{HistoryStore, LossPredicate, TransferNode};

mod faults;
mod sessions;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A running node. Dropping it stops the receive loop.
pub struct TestNode {
    pub node: TransferNode,
    _shutdown: broadcast::Sender<()>,
}

impl TestNode {
    pub fn addr(&self) -> std::net::SocketAddr {
        self.node.local_addr().expect("bound socket has an address")
    }
}

/// Timings short enough for tests, with room for scheduler jitter.
pub fn fast_config() -> TransferConfig {
    TransferConfig {
        ack_wait_ms: 30,
        max_send_failures: 5,
        request_timeout_ms: 2000,
        request_max_retries: 3,
        ..TransferConfig::default()
    }
}

pub async fn spawn_node(config: TransferConfig) -> Result<TestNode> {
    spawn_node_with(config, None).await
}

pub async fn spawn_node_with(
    config: TransferConfig,
    loss: Option<Arc<dyn LossPredicate>>,
) -> Result<TestNode> {
    let socket = UdpSocket::bind("127.0.0.1:0")
        .await
        .context("failed to bind test socket")?;
    let mut node = TransferNode::new(Arc::new(socket), config, HistoryStore::new());
    if let Some(loss) = loss {
        node = node.with_loss(loss);
    }

    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(node.clone().serve(rx));
    Ok(TestNode {
        node,
        _shutdown: tx,
    })
}

/// Fill `node`'s history with `count` broadcast messages from `from`.
pub fn seed_history(node: &TransferNode, from: &str, count: usize) {
    for i in 0..count {
        node.history()
            .add(ChatMessage::new(from, format!("message number {i} from {from}"), true));
    }
}

/// Poll `cond` every 10ms until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + limit;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {limit:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
