//! Authoritative simulation: match cache, tick loop and timers

pub mod orchestrator;
pub mod scheduler;
pub mod ticker;

pub use orchestrator::{EngineError, EngineSettings, MatchEngine};
pub use scheduler::{CancelToken, Scheduler, TokioScheduler};
pub use ticker::MatchTicker;

use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

/// Fan-out of server messages to everyone watching a match
pub trait MatchBroadcaster: Send + Sync {
    fn broadcast(&self, match_id: Uuid, msg: ServerMsg);
}
