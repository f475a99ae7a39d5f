//! The transfer node: process-wide state for history transfer.
//!
//! One `TransferNode` owns the datagram socket, the local history store and
//! both session registries. It is cheap to clone; every spawned task gets
//! its own handle.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use grrrr_core::config::TransferConfig;
use grrrr_core::message::History;
use grrrr_core::wire::{Packet, MAX_FRAME_LEN};

use crate::history::HistoryStore;
use crate::loss::{LossPredicate, NoLoss};
use crate::session::{new_inbound_buffers, new_outbound_sessions, InboundBuffers, OutboundSessions};
use crate::window::DeliveryReport;

const DELIVERY_REPORT_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct TransferNode {
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) config: TransferConfig,
    pub(crate) history: HistoryStore,
    pub(crate) outbound: OutboundSessions,
    pub(crate) inbound: InboundBuffers,
    pub(crate) deliveries: broadcast::Sender<DeliveryReport>,
    loss: Arc<dyn LossPredicate>,
}

impl TransferNode {
    pub fn new(socket: Arc<UdpSocket>, config: TransferConfig, history: HistoryStore) -> Self {
        Self {
            socket,
            config,
            history,
            outbound: new_outbound_sessions(),
            inbound: new_inbound_buffers(),
            deliveries: broadcast::channel(DELIVERY_REPORT_CAPACITY).0,
            loss: Arc::new(NoLoss),
        }
    }

    /// Filter inbound packets through `loss` before dispatch.
    pub fn with_loss(mut self, loss: Arc<dyn LossPredicate>) -> Self {
        self.loss = loss;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn current_history(&self) -> History {
        self.history.snapshot()
    }

    pub fn replace_history(&self, history: History) {
        self.history.replace(history);
    }

    pub fn outbound_sessions(&self) -> &OutboundSessions {
        &self.outbound
    }

    pub fn inbound_buffers(&self) -> &InboundBuffers {
        &self.inbound
    }

    /// Outcomes of transfers this node sends. Reports made before the
    /// call are not seen.
    pub fn subscribe_deliveries(&self) -> broadcast::Receiver<DeliveryReport> {
        self.deliveries.subscribe()
    }

    /// Decode one datagram and dispatch it. Undecodable datagrams and
    /// simulated losses are dropped here.
    pub async fn on_datagram(&self, buf: &[u8], from: SocketAddr) {
        let packet = match Packet::decode(buf) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(peer = %from, error = %e, "dropping undecodable datagram");
                return;
            }
        };

        if self.loss.should_drop(&packet) {
            tracing::debug!(peer = %from, kind = %packet.kind, seq_no = packet.seq_no, "simulated packet loss");
            return;
        }

        self.on_packet_received(packet, from).await;
    }

    /// Receive datagrams until `shutdown` fires. Each datagram is handled on
    /// its own task.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) {
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        tracing::info!(addr = ?self.local_addr().ok(), "transfer receiver started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("transfer receiver shutting down");
                    return;
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };

                    let datagram = buf[..len].to_vec();
                    let node = self.clone();
                    tokio::spawn(async move {
                        node.on_datagram(&datagram, from).await;
                    });
                }
            }
        }
    }
}
