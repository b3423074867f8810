//! Integration events exchanged with the rest of the platform

pub mod bus;
pub mod consumer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{Match, MatchMode, MatchStatus, Score};
use crate::store::PortError;

pub use bus::EventBus;
pub use consumer::EventConsumer;

pub const TOPIC_GAME_CREATED: &str = "game.created";
pub const TOPIC_GAME_STARTED: &str = "game.started";
pub const TOPIC_GAME_FINISHED: &str = "game.finished";
pub const TOPIC_TOURNAMENT_STARTED: &str = "tournament.started";
pub const TOPIC_USER_DELETED: &str = "user.deleted";

/// Events on the bus, routed by topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload")]
pub enum IntegrationEvent {
    #[serde(rename = "game.created")]
    GameCreated(GameLifecycle),
    #[serde(rename = "game.started")]
    GameStarted(GameLifecycle),
    #[serde(rename = "game.finished")]
    GameFinished(GameFinished),
    #[serde(rename = "tournament.started")]
    TournamentStarted(TournamentStarted),
    #[serde(rename = "user.deleted")]
    UserDeleted(UserDeleted),
}

impl IntegrationEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::GameCreated(_) => TOPIC_GAME_CREATED,
            Self::GameStarted(_) => TOPIC_GAME_STARTED,
            Self::GameFinished(_) => TOPIC_GAME_FINISHED,
            Self::TournamentStarted(_) => TOPIC_TOURNAMENT_STARTED,
            Self::UserDeleted(_) => TOPIC_USER_DELETED,
        }
    }
}

/// Payload for `game.created` and `game.started`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameLifecycle {
    pub game_id: Uuid,
    pub mode: MatchMode,
    pub tournament_id: Option<Uuid>,
    pub player_ids: Vec<Uuid>,
    pub status: MatchStatus,
    pub occurred_at: DateTime<Utc>,
}

impl GameLifecycle {
    pub fn of(game: &Match) -> Self {
        Self {
            game_id: game.id(),
            mode: game.mode(),
            tournament_id: game.tournament_id(),
            player_ids: game.players().iter().map(|p| p.id).collect(),
            status: game.status(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameFinished {
    pub game_id: Uuid,
    pub mode: MatchMode,
    pub tournament_id: Option<Uuid>,
    pub player_ids: Vec<Uuid>,
    pub winner_id: Option<Uuid>,
    pub score: Score,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl GameFinished {
    pub fn of(game: &Match) -> Self {
        Self {
            game_id: game.id(),
            mode: game.mode(),
            tournament_id: game.tournament_id(),
            player_ids: game.players().iter().map(|p| p.id).collect(),
            winner_id: game.winner(),
            score: game.score(),
            started_at: game.started_at(),
            finished_at: game.finished_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentStarted {
    pub tournament_id: Uuid,
    pub pairings: Vec<Pairing>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pairing {
    pub player1_id: Uuid,
    pub player2_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    pub user_id: Uuid,
}

/// Publication side of the message bus
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: IntegrationEvent) -> Result<(), PortError>;
}
