//! Pre-game coordination: ready-up, forfeit and reconnection grace

pub mod ready;
pub mod reconnect;

pub use ready::ReadyCoordinator;
pub use reconnect::ReconnectGrace;
