//! Game simulation modules

pub mod collision;
pub mod r#match;
pub mod physics;
pub mod snapshot;

pub use collision::{detect, CollisionOutcome, BALL_RADIUS};
pub use physics::advance;
pub use r#match::{
    Ball, Direction, Match, MatchConfig, MatchError, MatchMode, MatchStatus, Paddle, Player,
    Score, Side, PADDLE_HEIGHT, PADDLE_MARGIN, PADDLE_WIDTH,
};
pub use snapshot::MatchSnapshot;

/// Fixed simulation step, in ticks. Client-supplied deltas are ignored.
pub const SERVER_TICK_DT: f64 = 1.0;
