//! Packet loss simulation for debug runs.
//!
//! The receive path asks a [`LossPredicate`] about every decoded packet
//! before dispatching it. Production nodes use [`NoLoss`].

use grrrr_core::config::DebugConfig;
use grrrr_core::wire::{Packet, PacketKind};

pub trait LossPredicate: Send + Sync {
    /// `true` drops the packet as if the network lost it.
    fn should_drop(&self, packet: &Packet) -> bool;
}

/// Never drops anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoss;

impl LossPredicate for NoLoss {
    fn should_drop(&self, _packet: &Packet) -> bool {
        false
    }
}

/// Drops packets of one kind (or any kind) with a fixed probability.
#[derive(Debug, Clone, Copy)]
pub struct RandomLoss {
    kind: Option<PacketKind>,
    probability: f64,
}

impl RandomLoss {
    pub fn new(kind: Option<PacketKind>, probability: f64) -> Self {
        Self {
            kind,
            probability: probability.clamp(0.0, 1.0),
        }
    }
}

impl LossPredicate for RandomLoss {
    fn should_drop(&self, packet: &Packet) -> bool {
        if self.kind.is_some_and(|k| k != packet.kind) {
            return false;
        }
        rand::random::<f64>() < self.probability
    }
}

/// Pick the predicate for a node. Only debug mode with a non-zero
/// probability gets anything other than [`NoLoss`].
pub fn from_config(cfg: &DebugConfig) -> Box<dyn LossPredicate> {
    if cfg.loss_active() {
        tracing::warn!(
            probability = cfg.loss_probability,
            kind = ?cfg.loss_kind,
            "debug loss simulation enabled"
        );
        Box::new(RandomLoss::new(cfg.loss_kind, cfg.loss_probability))
    } else {
        Box::new(NoLoss)
    }
}
