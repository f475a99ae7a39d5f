//! grrrr-services: shared node state and the history transfer engine.
//!
//! History moves between nodes as a Go-Back-N transfer over UDP: the
//! requester sends REQUEST, the peer streams DATA packets a window at a
//! time, and the requester ACKs each in-order packet.

pub mod directory;
pub mod dispatch;
pub mod history;
pub mod loss;
pub mod node;
pub mod outbound;
pub mod request;
pub mod seq_buffer;
pub mod session;
pub mod window;

pub use directory::{Directory, DirectoryError, FileDirectory, MemoryDirectory, PeerCache, PeerRecord};
pub use history::HistoryStore;
pub use loss::{LossPredicate, NoLoss, RandomLoss};
pub use node::TransferNode;
pub use request::RequestOutcome;
pub use window::{DeliveryOutcome, DeliveryReport};
