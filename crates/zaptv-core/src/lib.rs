//! Channel pre-buffer core for instant zapping.
//!
//! Keeps a bounded pool of speculatively-buffering player instances for the
//! channels adjacent to the one on air, so channel up/down lands on a stream
//! that is already buffered.  The embedding layer (daemon, UI) talks to a
//! single [`ZapperCore`] event loop through cloneable [`Zapper`] handles and
//! observes results via [`zaptv_proto::state::StateManager`] snapshots plus
//! a [`BroadcastMessage`] push channel.

pub mod adjacency;
pub mod engine;
pub mod mpv;
pub mod pool;

mod core;
mod zapper;

pub use crate::core::ZapperCore;
pub use crate::zapper::{SwitchOutcome, Zapper};

/// Push notifications to subscribers.  `StateUpdated` is a ping: receivers
/// re-read the state snapshot, whose `rev` field covers lagged receivers.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    /// A channel switch completed (instant or cold).
    Switched { channel_id: String, instant: bool },
    Log(String),
}
