//! WebSocket protocol message definitions
//! These are the wire types for client-server communication.
//!
//! Every frame is `{"event": <name>, "data": <payload>}` with camelCase payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{Direction, Match, MatchStatus, Side};

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMsg {
    /// Subscribe to a match room (also used to reconnect)
    #[serde(rename = "join_game")]
    JoinGame(GameRef),

    /// Signal readiness during the lobby phase
    #[serde(rename = "ready")]
    Ready(GameRef),

    /// Relative paddle movement by one server tick
    #[serde(rename = "paddle_move")]
    PaddleMove(PaddleMove),

    /// Absolute paddle position
    #[serde(rename = "paddle_set")]
    PaddleSet(PaddleSet),
}

impl ClientMsg {
    pub fn game_id(&self) -> Uuid {
        match self {
            Self::JoinGame(r) | Self::Ready(r) => r.game_id,
            Self::PaddleMove(m) => m.game_id,
            Self::PaddleSet(s) => s.game_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRef {
    pub game_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddleMove {
    pub game_id: Uuid,
    pub direction: Direction,
    /// Accepted for compatibility, never used: the server applies its own tick
    #[serde(default)]
    pub delta_time: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddleSet {
    pub game_id: Uuid,
    pub y: f64,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMsg {
    /// Full frame: ball, paddles, score and status
    #[serde(rename = "game_state")]
    GameState(GameStateFrame),

    /// High-frequency ball frame, sent every tick
    #[serde(rename = "ball_state")]
    BallState(BallStateFrame),

    #[serde(rename = "paddle_update")]
    PaddleUpdate(PaddleUpdate),

    #[serde(rename = "game:finished")]
    GameFinished(GameFinishedFrame),

    #[serde(rename = "game_cancelled")]
    GameCancelled(GameCancelled),

    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerMsg {
    pub fn game_state(game: &Match) -> Self {
        let paddle = |side: Side| {
            game.player_on(side).map(|p| PaddleFrame { y: p.paddle.y })
        };
        Self::GameState(GameStateFrame {
            game_id: game.id(),
            status: game.status(),
            ball: BallFrame::of(game),
            paddles: PaddlesFrame {
                left: paddle(Side::Left),
                right: paddle(Side::Right),
            },
            score: ScoreFrame {
                player1: game.score().player1,
                player2: game.score().player2,
            },
        })
    }

    pub fn ball_state(game: &Match) -> Self {
        Self::BallState(BallStateFrame {
            game_id: game.id(),
            status: game.status(),
            ball: BallFrame::of(game),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallFrame {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

impl BallFrame {
    fn of(game: &Match) -> Self {
        let ball = game.ball();
        Self {
            x: ball.x,
            y: ball.y,
            vx: ball.dx,
            vy: ball.dy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaddleFrame {
    pub y: f64,
}

/// Paddles by side; an empty seat is `null`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaddlesFrame {
    pub left: Option<PaddleFrame>,
    pub right: Option<PaddleFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreFrame {
    pub player1: u32,
    pub player2: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateFrame {
    pub game_id: Uuid,
    pub status: MatchStatus,
    pub ball: BallFrame,
    pub paddles: PaddlesFrame,
    pub score: ScoreFrame,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallStateFrame {
    pub game_id: Uuid,
    pub status: MatchStatus,
    pub ball: BallFrame,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddleUpdate {
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub side: Side,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalScore {
    pub left: u32,
    pub right: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameFinishedFrame {
    pub game_id: Uuid,
    /// Higher scorer; `None` on a tie
    pub winner_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_username: Option<String>,
    pub final_score: FinalScore,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCancelled {
    pub game_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}
