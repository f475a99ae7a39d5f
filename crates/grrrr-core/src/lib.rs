//! grrrr-core: shared types, wire format, packetizer, and configuration.
//! All other Grrrr crates depend on this one.

pub mod chunk;
pub mod config;
pub mod message;
pub mod wire;

pub use chunk::packetize;
pub use message::{ChatMessage, History, Reply};
pub use wire::{Packet, PacketKind, WireError};
