//! Receiver dispatcher: routes each inbound packet by kind.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;

use grrrr_core::chunk::{packetize, reassemble};
use grrrr_core::message::History;
use grrrr_core::wire::{Packet, PacketKind};

use crate::node::TransferNode;
use crate::outbound::send_packet;
use crate::session::{remove_exact, ReassemblyResult, ReassemblySession, TransferSession};
use crate::window::{drive, DeliveryOutcome, DeliveryReport};

impl TransferNode {
    /// Entry point for every decoded packet.
    pub async fn on_packet_received(&self, packet: Packet, from: SocketAddr) {
        match packet.kind {
            PacketKind::Request => {
                // Detached: the outcome arrives through `subscribe_deliveries`.
                drop(self.handle_request(from));
            }
            PacketKind::Ack => self.handle_ack(packet.seq_no, from),
            PacketKind::Data => self.handle_data(packet, from).await,
        }
    }

    /// Start streaming our history to `from` unless a transfer to that peer
    /// is already running. Returns the driver task if one was started.
    pub fn handle_request(&self, from: SocketAddr) -> Option<JoinHandle<DeliveryOutcome>> {
        let session = match self.outbound.entry(from) {
            Entry::Occupied(_) => {
                tracing::debug!(peer = %from, "transfer already in flight, ignoring REQUEST");
                return None;
            }
            Entry::Vacant(slot) => {
                let blob = match self.history.to_blob() {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::error!(peer = %from, error = %e, "cannot serialize history");
                        return None;
                    }
                };
                let packets = packetize(&blob, self.config.chunk_size);
                if packets.is_empty() {
                    return None;
                }
                let session = Arc::new(TransferSession::new(from, packets, self.config.window_size));
                slot.insert(session.clone());
                session
            }
        };

        tracing::info!(peer = %from, packets = session.len(), "sending history");
        let node = self.clone();
        Some(tokio::spawn(async move { node.run_transfer(session).await }))
    }

    async fn run_transfer(&self, session: Arc<TransferSession>) -> DeliveryOutcome {
        let outcome = drive(
            &self.socket,
            &session,
            self.config.ack_wait(),
            self.config.max_send_failures,
        )
        .await;
        remove_exact(&self.outbound, &session.peer(), &session);
        // No subscribers is fine.
        let _ = self.deliveries.send(DeliveryReport {
            peer: session.peer(),
            outcome,
        });
        outcome
    }

    fn handle_ack(&self, seq_no: u32, from: SocketAddr) {
        let Some(session) = self.outbound.get(&from).map(|s| s.value().clone()) else {
            tracing::trace!(peer = %from, seq_no, "ACK with no transfer in flight");
            return;
        };
        if !session.on_ack(seq_no) {
            tracing::trace!(peer = %from, seq_no, ack_state = session.ack_state(), "ignoring stale ACK");
        }
    }

    async fn handle_data(&self, packet: Packet, from: SocketAddr) {
        let Some(session) = self.inbound.get(&from).map(|s| s.value().clone()) else {
            tracing::trace!(peer = %from, seq_no = packet.seq_no, "DATA with no pending request");
            return;
        };

        let chunk_size = self.config.chunk_size;
        let len = packet.payload.len();
        if len > chunk_size || (!packet.is_last && len != chunk_size) {
            tracing::debug!(peer = %from, seq_no = packet.seq_no, len, "dropping malformed chunk");
            return;
        }

        if !session.chunks().append_on_seq(packet.seq_no, packet.payload.clone()) {
            // A resend of a chunk we already hold means our ACK was lost.
            if packet.seq_no as usize <= session.chunks().len() {
                tracing::trace!(peer = %from, seq_no = packet.seq_no, "re-acknowledging duplicate chunk");
                send_packet(&self.socket, from, &Packet::ack(packet.seq_no)).await;
                return;
            }
            tracing::trace!(
                peer = %from,
                seq_no = packet.seq_no,
                have = session.chunks().len(),
                "dropping out-of-order chunk"
            );
            return;
        }

        send_packet(&self.socket, from, &Packet::ack(packet.seq_no)).await;

        if packet.is_last && session.chunks().len() == packet.seq_no as usize {
            self.finish_reassembly(from, &session);
        }
    }

    /// Reassemble and install. Only the caller that removes the registry
    /// entry does the work.
    fn finish_reassembly(&self, from: SocketAddr, session: &Arc<ReassemblySession>) {
        if !remove_exact(&self.inbound, &from, session) {
            return;
        }

        let chunks = session.chunks().snapshot();
        let blob = reassemble(chunks.iter());
        match History::from_blob(&blob) {
            Ok(history) => {
                let count = history.messages.len();
                self.history.replace(history);
                tracing::info!(peer = %from, messages = count, bytes = blob.len(), "history installed");
                session.finish(ReassemblyResult::Installed(count));
            }
            Err(e) => {
                tracing::warn!(peer = %from, error = %e, "received history is corrupt");
                session.finish(ReassemblyResult::Corrupt);
            }
        }
    }
}
