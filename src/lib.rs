//! Pong Match Server - authoritative real-time engine for two-player Pong
//!
//! The server owns every live match: it advances physics on a fixed tick,
//! applies player input, runs the ready-up and reconnection lobby, and
//! streams state to clients over WebSocket.

pub mod app;
pub mod config;
pub mod engine;
pub mod events;
pub mod game;
pub mod http;
pub mod lobby;
pub mod store;
pub mod util;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

pub use app::AppState;
pub use config::Config;
pub use http::build_router;
