//! Transfer sessions and the per-peer registries that hold them.
//!
//! Each registry is keyed by the peer's datagram address and holds at most
//! one session per peer. Sessions are `Arc`-shared between the registry and
//! the task driving them; removal goes through [`remove_exact`] so a session
//! is only ever removed by the task that still owns that exact entry.

use std::hash::Hash;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Notify;

use grrrr_core::wire::Packet;

use crate::seq_buffer::SeqBuffer;

// ── Sender side ──────────────────────────────────────────────────────────────

/// One outgoing history transfer.
#[derive(Debug)]
pub struct TransferSession {
    peer: SocketAddr,
    packets: Vec<Packet>,
    window: u32,
    /// Every sequence number below this has been acknowledged.
    ack_state: AtomicU32,
    /// Set by an accepted ACK, cleared by the window driver.
    woken: AtomicBool,
    wake: Notify,
}

impl TransferSession {
    pub fn new(peer: SocketAddr, packets: Vec<Packet>, window: u32) -> Self {
        Self {
            peer,
            packets,
            window: window.max(1),
            ack_state: AtomicU32::new(1),
            woken: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// Number of DATA packets in the transfer.
    pub fn len(&self) -> u32 {
        self.packets.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Packet by 1-based sequence number.
    pub fn packet(&self, seq_no: u32) -> Option<&Packet> {
        let idx = seq_no.checked_sub(1)? as usize;
        self.packets.get(idx)
    }

    pub fn ack_state(&self) -> u32 {
        self.ack_state.load(Ordering::Acquire)
    }

    /// Apply an ACK. Returns `true` if it advanced `ack_state`.
    ///
    /// Accepted only for `ack_state <= seq_no <= ack_state + window` and
    /// `seq_no` within the transfer. `ack_state` never moves backwards.
    pub fn on_ack(&self, seq_no: u32) -> bool {
        if seq_no == 0 || seq_no > self.len() {
            return false;
        }
        let advanced = self
            .ack_state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current <= seq_no && seq_no <= current.saturating_add(self.window))
                    .then_some(seq_no + 1)
            })
            .is_ok();
        if advanced {
            self.woken.store(true, Ordering::Release);
            self.wake.notify_one();
        }
        advanced
    }

    /// Clear the wake flag, returning whether an ACK set it.
    pub fn take_wake(&self) -> bool {
        self.woken.swap(false, Ordering::AcqRel)
    }

    /// Resolves on the next accepted ACK, or immediately if one arrived
    /// since the last call.
    pub async fn acked(&self) {
        self.wake.notified().await
    }
}

// ── Receiver side ────────────────────────────────────────────────────────────

/// How a reassembly ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyResult {
    /// History replaced with this many messages.
    Installed(usize),
    /// All chunks arrived but the blob did not parse.
    Corrupt,
}

/// One incoming history transfer.
#[derive(Debug)]
pub struct ReassemblySession {
    peer: SocketAddr,
    chunks: SeqBuffer<Bytes>,
    result: OnceLock<ReassemblyResult>,
    done: Notify,
}

impl ReassemblySession {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            chunks: SeqBuffer::new(),
            result: OnceLock::new(),
            done: Notify::new(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn chunks(&self) -> &SeqBuffer<Bytes> {
        &self.chunks
    }

    /// Record the outcome and wake the requester. Only the first call counts.
    pub fn finish(&self, result: ReassemblyResult) -> bool {
        let first = self.result.set(result).is_ok();
        if first {
            self.done.notify_one();
        }
        first
    }

    pub fn result(&self) -> Option<ReassemblyResult> {
        self.result.get().copied()
    }

    /// Resolves once `finish` has been called.
    pub async fn finished(&self) {
        if self.result.get().is_some() {
            return;
        }
        self.done.notified().await
    }
}

// ── Registries ───────────────────────────────────────────────────────────────

/// Sender-side sessions, one per requesting peer.
pub type OutboundSessions = Arc<DashMap<SocketAddr, Arc<TransferSession>>>;

/// Receiver-side chunk buffers, one per peer we requested history from.
pub type InboundBuffers = Arc<DashMap<SocketAddr, Arc<ReassemblySession>>>;

pub fn new_outbound_sessions() -> OutboundSessions {
    Arc::new(DashMap::new())
}

pub fn new_inbound_buffers() -> InboundBuffers {
    Arc::new(DashMap::new())
}

/// Remove `key` only if it still maps to `session`.
///
/// Returns `true` for exactly one caller per entry, however many race.
pub fn remove_exact<K, V>(map: &DashMap<K, Arc<V>>, key: &K, session: &Arc<V>) -> bool
where
    K: Eq + Hash,
{
    map.remove_if(key, |_, current| Arc::ptr_eq(current, session))
        .is_some()
}
