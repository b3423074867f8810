//! Real-time socket layer: wire protocol, rooms and client sessions

pub mod handler;
pub mod protocol;
pub mod rooms;
pub mod session;

pub use rooms::RoomHub;
pub use session::{Connection, GameGateway, SessionError};
