//! Request initiator: ask a peer for its history and wait for it to arrive.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;

use grrrr_core::wire::Packet;

use crate::node::TransferNode;
use crate::outbound::send_packet;
use crate::session::{remove_exact, ReassemblyResult, ReassemblySession};

/// How a history request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The peer's history replaced ours; it holds this many messages.
    Installed(usize),
    /// We are already downloading from this peer.
    AlreadyInProgress,
    /// No complete transfer within the retry budget.
    TimedOut,
    /// Every chunk arrived but the history did not parse.
    Corrupt,
}

impl From<ReassemblyResult> for RequestOutcome {
    fn from(r: ReassemblyResult) -> Self {
        match r {
            ReassemblyResult::Installed(n) => RequestOutcome::Installed(n),
            ReassemblyResult::Corrupt => RequestOutcome::Corrupt,
        }
    }
}

impl TransferNode {
    /// Request `peer`'s history and install it locally.
    ///
    /// Sends REQUEST, then waits up to `request_timeout` per attempt. An
    /// attempt that ends with no chunk received resends REQUEST; one that
    /// ends with a partial buffer keeps waiting without resending.
    pub async fn request_history(&self, peer: SocketAddr) -> RequestOutcome {
        let session = match self.inbound.entry(peer) {
            Entry::Occupied(_) => {
                tracing::info!(peer = %peer, "history download already in progress");
                return RequestOutcome::AlreadyInProgress;
            }
            Entry::Vacant(slot) => {
                let session = Arc::new(ReassemblySession::new(peer));
                slot.insert(session.clone());
                session
            }
        };

        let timeout = self.config.request_timeout();
        for attempt in 1..=self.config.request_max_retries {
            if attempt == 1 {
                send_packet(&self.socket, peer, &Packet::request()).await;
            } else if session.chunks().is_empty() {
                tracing::info!(peer = %peer, attempt, "no reply, resending REQUEST");
                send_packet(&self.socket, peer, &Packet::request()).await;
            } else {
                tracing::debug!(peer = %peer, attempt, have = session.chunks().len(), "transfer in progress, waiting");
            }

            if tokio::time::timeout(timeout, session.finished()).await.is_ok() {
                return self.outcome_of(&session);
            }
        }

        if remove_exact(&self.inbound, &peer, &session) {
            tracing::warn!(
                peer = %peer,
                have = session.chunks().len(),
                "waited too long, aborting history download"
            );
            return RequestOutcome::TimedOut;
        }

        // Reassembly claimed the entry first; its result is moments away.
        let _ = tokio::time::timeout(timeout, session.finished()).await;
        self.outcome_of(&session)
    }

    fn outcome_of(&self, session: &ReassemblySession) -> RequestOutcome {
        session
            .result()
            .map(RequestOutcome::from)
            .unwrap_or(RequestOutcome::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryStore;
    use grrrr_core::config::TransferConfig;
    use grrrr_core::wire::PacketKind;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    async fn node(config: TransferConfig) -> TransferNode {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        TransferNode::new(socket, config, HistoryStore::new())
    }

    fn quick() -> TransferConfig {
        TransferConfig {
            request_timeout_ms: 60,
            request_max_retries: 3,
            ..TransferConfig::default()
        }
    }

    #[tokio::test]
    async fn silent_peer_times_out_after_three_requests() {
        let n = node(quick()).await;
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = silent.local_addr().unwrap();

        let outcome = n.request_history(peer).await;
        assert_eq!(outcome, RequestOutcome::TimedOut);
        assert!(n.inbound_buffers().is_empty());

        let mut requests = 0;
        let mut buf = [0u8; 64];
        while let Ok(Ok((len, _))) =
            tokio::time::timeout(Duration::from_millis(30), silent.recv_from(&mut buf)).await
        {
            assert_eq!(Packet::decode(&buf[..len]).unwrap().kind, PacketKind::Request);
            requests += 1;
        }
        assert_eq!(requests, 3);
    }

    #[tokio::test]
    async fn second_request_to_same_peer_is_rejected() {
        let n = node(quick()).await;
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = silent.local_addr().unwrap();

        let first = {
            let n = n.clone();
            tokio::spawn(async move { n.request_history(peer).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(n.request_history(peer).await, RequestOutcome::AlreadyInProgress);
        assert_eq!(first.await.unwrap(), RequestOutcome::TimedOut);
    }

    #[tokio::test]
    async fn partial_progress_suppresses_resend() {
        let n = node(quick()).await;
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = silent.local_addr().unwrap();

        let task = {
            let n = n.clone();
            tokio::spawn(async move { n.request_history(peer).await })
        };

        // first REQUEST arrives, then a chunk lands before the first timeout
        let mut buf = [0u8; 64];
        silent.recv_from(&mut buf).await.unwrap();
        let session = n.inbound_buffers().get(&peer).map(|s| s.value().clone()).unwrap();
        assert!(session.chunks().append_on_seq(1, bytes::Bytes::from_static(b"0123456789")));

        assert_eq!(task.await.unwrap(), RequestOutcome::TimedOut);
        assert!(n.inbound_buffers().is_empty());

        let extra = tokio::time::timeout(Duration::from_millis(30), silent.recv_from(&mut buf)).await;
        assert!(extra.is_err(), "no REQUEST should be resent while chunks are arriving");
    }

    #[test]
    fn reassembly_results_map_to_outcomes() {
        assert_eq!(
            RequestOutcome::from(ReassemblyResult::Installed(4)),
            RequestOutcome::Installed(4)
        );
        assert_eq!(RequestOutcome::from(ReassemblyResult::Corrupt), RequestOutcome::Corrupt);
    }
}
