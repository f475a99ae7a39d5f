//! Sender window driver: Go-Back-N over one [`TransferSession`].
//!
//! Each round sends the packets of the current window, then waits for an ACK
//! or the ACK timeout. A round that ends after an ACK only sends packets not
//! yet sent; a round that ends on timeout resends the whole window. A round
//! may advance the window start by at most one window, however far the ACKs
//! got. After `max_failures` consecutive rounds with no progress the
//! transfer is abandoned.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::outbound::send_packet;
use crate::session::TransferSession;

/// How an outgoing transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Every packet was acknowledged.
    Delivered,
    /// Too many rounds passed without an ACK.
    Failed,
}

/// Published by the node when an outgoing transfer ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub peer: SocketAddr,
    pub outcome: DeliveryOutcome,
}

/// Drive `session` until every packet is acknowledged or the failure
/// budget is spent. Does not touch the session registry.
pub async fn drive(
    socket: &UdpSocket,
    session: &TransferSession,
    ack_wait: Duration,
    max_failures: u32,
) -> DeliveryOutcome {
    let peer = session.peer();
    let size = session.len();
    let window = session.window();

    let mut state = session.ack_state();
    let mut failures = 0u32;
    let mut sent_up_to = 0u32;

    while state <= size {
        let end = size.min(state.saturating_add(window - 1));
        let start = if session.take_wake() {
            state.max(sent_up_to + 1)
        } else {
            state
        };

        for seq in start..=end {
            if let Some(packet) = session.packet(seq) {
                tracing::debug!(peer = %peer, seq_no = seq, "sending DATA packet");
                send_packet(socket, peer, packet).await;
            }
        }
        sent_up_to = sent_up_to.max(end);

        wait_for_progress(session, state, ack_wait).await;

        let acked = session.ack_state();
        if acked == state {
            failures += 1;
            tracing::debug!(peer = %peer, state, failures, "no ACK progress, resending window");
            if failures >= max_failures {
                tracing::warn!(peer = %peer, acked = state - 1, total = size, "delivery failed");
                return DeliveryOutcome::Failed;
            }
        } else {
            failures = 0;
            state = acked.min(state.saturating_add(window));
            tracing::trace!(peer = %peer, state, "window advanced");
        }
    }

    tracing::info!(peer = %peer, packets = size, "delivered");
    DeliveryOutcome::Delivered
}

/// Block until `ack_state` moves past `state` or `ack_wait` elapses.
/// A wake left over from an ACK already accounted for does not end the wait.
async fn wait_for_progress(session: &TransferSession, state: u32, ack_wait: Duration) {
    let deadline = Instant::now() + ack_wait;
    while session.ack_state() == state {
        if tokio::time::timeout_at(deadline, session.acked()).await.is_err() {
            return;
        }
    }
}
