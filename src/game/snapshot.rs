//! Serializable match snapshots and load-time repair

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::physics::serve_direction;
use super::r#match::{
    Ball, Match, MatchConfig, MatchMode, MatchParts, MatchStatus, Paddle, Player, Score, Side,
};

/// Plain representation of a match's full state.
///
/// Every numeric field of the ball and paddles is optional so that records
/// written with NaN (serialized as `null`) or by an older schema still load.
/// A nested object stored as `null` loads as its default and is repaired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub id: Uuid,
    pub status: MatchStatus,
    #[serde(default)]
    pub mode: MatchMode,
    #[serde(default)]
    pub tournament_id: Option<Uuid>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub config: MatchConfig,
    #[serde(default, deserialize_with = "null_as_default")]
    pub score: Score,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ball: BallSnapshot,
    #[serde(default, deserialize_with = "null_as_default")]
    pub players: Vec<PlayerSnapshot>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BallSnapshot {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default, alias = "vx")]
    pub dx: Option<f64>,
    #[serde(default, alias = "vy")]
    pub dy: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PaddleSnapshot {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    #[serde(default, deserialize_with = "null_as_default")]
    pub paddle: PaddleSnapshot,
    #[serde(default = "default_true")]
    pub connected: bool,
    #[serde(default)]
    pub ready: bool,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_true() -> bool {
    true
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

impl From<&Match> for MatchSnapshot {
    fn from(game: &Match) -> Self {
        let ball = game.ball();
        Self {
            id: game.id(),
            status: game.status(),
            mode: game.mode(),
            tournament_id: game.tournament_id(),
            config: *game.config(),
            score: game.score(),
            ball: BallSnapshot {
                x: Some(ball.x),
                y: Some(ball.y),
                dx: Some(ball.dx),
                dy: Some(ball.dy),
            },
            players: game
                .players()
                .iter()
                .map(|p| PlayerSnapshot {
                    id: p.id,
                    paddle: PaddleSnapshot {
                        x: Some(p.paddle.x),
                        y: Some(p.paddle.y),
                        width: Some(p.paddle.width),
                        height: Some(p.paddle.height),
                    },
                    connected: p.connected,
                    ready: p.ready,
                })
                .collect(),
            created_at: game.created_at(),
            updated_at: game.updated_at(),
            started_at: game.started_at(),
            finished_at: game.finished_at(),
        }
    }
}

impl MatchSnapshot {
    /// Rebuild the aggregate, repairing anything that is not a finite number.
    ///
    /// A broken ball is replaced by a centred serve in a random direction and a
    /// broken paddle is re-centred in its seat's default slot. The returned flag
    /// is true when any repair happened.
    pub fn restore<R: Rng + ?Sized>(self, rng: &mut R) -> (Match, bool) {
        let config = self.config.sanitized();
        let mut repaired = false;

        let ball = match (
            finite(self.ball.x),
            finite(self.ball.y),
            finite(self.ball.dx),
            finite(self.ball.dy),
        ) {
            (Some(x), Some(y), Some(dx), Some(dy)) => Ball::new(x, y, dx, dy),
            _ => {
                repaired = true;
                Ball::serve(&config, serve_direction(rng))
            }
        };

        if self.players.len() > 2 {
            repaired = true;
        }

        let players = self
            .players
            .into_iter()
            .take(2)
            .enumerate()
            .map(|(seat, raw)| {
                let slot = Paddle::for_side(Side::from_seat(seat), &config);
                let paddle = match (finite(raw.paddle.x), finite(raw.paddle.y)) {
                    (Some(x), Some(y)) => {
                        let height = finite(raw.paddle.height)
                            .filter(|h| *h > 0.0)
                            .unwrap_or(slot.height);
                        let max = (config.arena_height - height).max(0.0);
                        Paddle {
                            x,
                            y: y.clamp(0.0, max),
                            width: finite(raw.paddle.width)
                                .filter(|w| *w > 0.0)
                                .unwrap_or(slot.width),
                            height,
                        }
                    }
                    _ => {
                        repaired = true;
                        slot
                    }
                };
                Player {
                    id: raw.id,
                    paddle,
                    connected: raw.connected,
                    ready: raw.ready,
                }
            })
            .collect();

        let game = Match::restore(MatchParts {
            id: self.id,
            status: self.status,
            mode: self.mode,
            tournament_id: self.tournament_id,
            config,
            score: self.score,
            ball,
            players,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        });

        (game, repaired)
    }
}
