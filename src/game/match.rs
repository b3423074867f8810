//! Match aggregate: the authoritative state of one Pong game
//!
//! All mutation goes through named methods so that paddle clamping and the
//! status transition rules cannot be bypassed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default paddle dimensions
pub const PADDLE_WIDTH: f64 = 10.0;
pub const PADDLE_HEIGHT: f64 = 100.0;
/// Horizontal gap between a paddle and its goal line
pub const PADDLE_MARGIN: f64 = 20.0;

/// Match lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Waiting,
    InProgress,
    Finished,
    Cancelled,
}

impl MatchStatus {
    /// Finished and cancelled matches never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Classic,
    Tournament,
    Ranked,
    Custom,
}

/// Arena and tuning parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchConfig {
    pub arena_width: f64,
    pub arena_height: f64,
    pub score_limit: u32,
    pub paddle_speed: f64,
    pub ball_speed: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            arena_width: 800.0,
            arena_height: 600.0,
            score_limit: 11,
            paddle_speed: 8.0,
            ball_speed: 5.0,
        }
    }
}

impl MatchConfig {
    /// Replace any non-positive or non-finite value with its default
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let positive = |v: f64, d: f64| if v.is_finite() && v > 0.0 { v } else { d };
        Self {
            arena_width: positive(self.arena_width, defaults.arena_width),
            arena_height: positive(self.arena_height, defaults.arena_height),
            score_limit: if self.score_limit > 0 {
                self.score_limit
            } else {
                defaults.score_limit
            },
            paddle_speed: positive(self.paddle_speed, defaults.paddle_speed),
            ball_speed: positive(self.ball_speed, defaults.ball_speed),
        }
    }
}

/// Score, player1 (left) first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Score {
    pub player1: u32,
    pub player2: u32,
}

impl Score {
    pub fn new(player1: u32, player2: u32) -> Self {
        Self { player1, player2 }
    }

    pub fn get(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.player1,
            Side::Right => self.player2,
        }
    }

    pub fn increment(&mut self, side: Side) {
        match side {
            Side::Left => self.player1 += 1,
            Side::Right => self.player2 += 1,
        }
    }
}

/// Ball position and velocity (units per tick)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
}

impl Ball {
    pub fn new(x: f64, y: f64, dx: f64, dy: f64) -> Self {
        Self { x, y, dx, dy }
    }

    /// Ball at the arena centre serving toward `direction` (+1 right, -1 left)
    pub fn serve(config: &MatchConfig, direction: f64) -> Self {
        Self {
            x: config.arena_width / 2.0,
            y: config.arena_height / 2.0,
            dx: config.ball_speed * direction.signum(),
            dy: config.ball_speed,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.dx.is_finite() && self.dy.is_finite()
    }
}

/// Which half of the arena a player defends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn from_seat(seat: usize) -> Self {
        if seat == 0 {
            Self::Left
        } else {
            Self::Right
        }
    }

    pub fn seat(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Paddle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Paddle {
    /// Default paddle for a seat: vertically centred, `PADDLE_MARGIN` from the goal line
    pub fn for_side(side: Side, config: &MatchConfig) -> Self {
        let x = match side {
            Side::Left => PADDLE_MARGIN,
            Side::Right => config.arena_width - PADDLE_MARGIN - PADDLE_WIDTH,
        };
        Self {
            x,
            y: (config.arena_height - PADDLE_HEIGHT) / 2.0,
            width: PADDLE_WIDTH,
            height: PADDLE_HEIGHT,
        }
    }

    fn clamp_y(&self, y: f64, arena_height: f64) -> f64 {
        let max = (arena_height - self.height).max(0.0);
        if y.is_nan() {
            return max / 2.0;
        }
        y.clamp(0.0, max)
    }
}

/// Paddle movement direction; up decreases y
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Self::Up => -1.0,
            Self::Down => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub paddle: Paddle,
    pub connected: bool,
    pub ready: bool,
}

/// Aggregate errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Player {0} is not in this match")]
    PlayerNotFound(Uuid),
}

/// Raw parts used to rebuild a match from a snapshot
pub(crate) struct MatchParts {
    pub id: Uuid,
    pub status: MatchStatus,
    pub mode: MatchMode,
    pub tournament_id: Option<Uuid>,
    pub config: MatchConfig,
    pub score: Score,
    pub ball: Ball,
    pub players: Vec<Player>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One Pong game between up to two players
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    id: Uuid,
    status: MatchStatus,
    mode: MatchMode,
    tournament_id: Option<Uuid>,
    config: MatchConfig,
    score: Score,
    ball: Ball,
    players: Vec<Player>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Match {
    /// Create a new waiting match seating `player_ids` in order (at most two)
    pub fn new(
        id: Uuid,
        mode: MatchMode,
        tournament_id: Option<Uuid>,
        config: MatchConfig,
        player_ids: &[Uuid],
    ) -> Result<Self, MatchError> {
        let config = config.sanitized();
        let now = Utc::now();
        let mut game = Self {
            id,
            status: MatchStatus::Waiting,
            mode,
            tournament_id,
            config,
            score: Score::default(),
            ball: Ball::serve(&config, 1.0),
            players: Vec::with_capacity(2),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        };
        for player_id in player_ids {
            game.add_player(*player_id)?;
        }
        Ok(game)
    }

    pub(crate) fn restore(parts: MatchParts) -> Self {
        Self {
            id: parts.id,
            status: parts.status,
            mode: parts.mode,
            tournament_id: parts.tournament_id,
            config: parts.config,
            score: parts.score,
            ball: parts.ball,
            players: parts.players,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            started_at: parts.started_at,
            finished_at: parts.finished_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> MatchStatus {
        self.status
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn tournament_id(&self) -> Option<Uuid> {
        self.tournament_id
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn score(&self) -> Score {
        self.score
    }

    pub fn ball(&self) -> Ball {
        self.ball
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn has_player(&self, player_id: Uuid) -> bool {
        self.players.iter().any(|p| p.id == player_id)
    }

    pub fn player(&self, player_id: Uuid) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn player_side(&self, player_id: Uuid) -> Option<Side> {
        self.players
            .iter()
            .position(|p| p.id == player_id)
            .map(Side::from_seat)
    }

    pub fn player_on(&self, side: Side) -> Option<&Player> {
        self.players.get(side.seat())
    }

    pub fn ready_count(&self) -> usize {
        self.players.iter().filter(|p| p.ready).count()
    }

    /// Player with the higher score; a tie has no winner
    pub fn winner(&self) -> Option<Uuid> {
        let side = match self.score.player1.cmp(&self.score.player2) {
            std::cmp::Ordering::Greater => Side::Left,
            std::cmp::Ordering::Less => Side::Right,
            std::cmp::Ordering::Equal => return None,
        };
        self.player_on(side).map(|p| p.id)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn player_mut(&mut self, player_id: Uuid) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == player_id)
    }

    /// Seat a player in the next free slot
    pub fn add_player(&mut self, player_id: Uuid) -> Result<(), MatchError> {
        if self.status != MatchStatus::Waiting {
            return Err(MatchError::InvalidState(
                "players can only join a waiting match".to_string(),
            ));
        }
        if self.has_player(player_id) {
            return Err(MatchError::InvalidState(format!(
                "player {} already joined",
                player_id
            )));
        }
        if self.players.len() >= 2 {
            return Err(MatchError::InvalidState("match is full".to_string()));
        }
        let side = Side::from_seat(self.players.len());
        self.players.push(Player {
            id: player_id,
            paddle: Paddle::for_side(side, &self.config),
            connected: true,
            ready: false,
        });
        self.touch();
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), MatchError> {
        if self.status != MatchStatus::Waiting || self.players.len() != 2 {
            return Err(MatchError::InvalidState(format!(
                "cannot start a {:?} match with {} players",
                self.status,
                self.players.len()
            )));
        }
        let now = Utc::now();
        self.status = MatchStatus::InProgress;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Finish the match. Calling it again on a finished match is a no-op.
    pub fn finish(&mut self) -> Result<(), MatchError> {
        match self.status {
            MatchStatus::Finished => Ok(()),
            MatchStatus::Cancelled => Err(MatchError::InvalidState(
                "a cancelled match cannot be finished".to_string(),
            )),
            MatchStatus::Waiting | MatchStatus::InProgress => {
                let now = Utc::now();
                self.status = MatchStatus::Finished;
                self.finished_at = Some(now);
                self.updated_at = now;
                Ok(())
            }
        }
    }

    pub fn cancel(&mut self) -> Result<(), MatchError> {
        match self.status {
            MatchStatus::Cancelled => Ok(()),
            MatchStatus::Waiting => {
                self.status = MatchStatus::Cancelled;
                self.touch();
                Ok(())
            }
            other => Err(MatchError::InvalidState(format!(
                "cannot cancel a {:?} match",
                other
            ))),
        }
    }

    pub fn move_paddle(
        &mut self,
        player_id: Uuid,
        direction: Direction,
        dt: f64,
    ) -> Result<f64, MatchError> {
        let step = self.config.paddle_speed * dt * direction.sign();
        let arena_height = self.config.arena_height;
        let player = self
            .player_mut(player_id)
            .ok_or(MatchError::PlayerNotFound(player_id))?;
        let y = player.paddle.clamp_y(player.paddle.y + step, arena_height);
        player.paddle.y = y;
        self.touch();
        Ok(y)
    }

    pub fn set_paddle_position(&mut self, player_id: Uuid, y: f64) -> Result<f64, MatchError> {
        let arena_height = self.config.arena_height;
        let player = self
            .player_mut(player_id)
            .ok_or(MatchError::PlayerNotFound(player_id))?;
        let y = player.paddle.clamp_y(y, arena_height);
        player.paddle.y = y;
        self.touch();
        Ok(y)
    }

    pub fn update_ball(&mut self, ball: Ball) {
        self.ball = ball;
        self.touch();
    }

    pub fn update_score(&mut self, score: Score) {
        self.score = score;
        self.touch();
    }

    /// Mark a player ready; returns whether every seated player is now ready
    pub fn mark_ready(&mut self, player_id: Uuid) -> Result<bool, MatchError> {
        let player = self.player_mut(player_id).ok_or_else(|| {
            MatchError::InvalidState(format!("player {} is not in this match", player_id))
        })?;
        player.ready = true;
        self.touch();
        Ok(self.players.iter().all(|p| p.ready))
    }

    pub fn disconnect_player(&mut self, player_id: Uuid) -> Result<(), MatchError> {
        let player = self
            .player_mut(player_id)
            .ok_or(MatchError::PlayerNotFound(player_id))?;
        player.connected = false;
        self.touch();
        Ok(())
    }

    pub fn reconnect_player(&mut self, player_id: Uuid) -> Result<(), MatchError> {
        let player = self
            .player_mut(player_id)
            .ok_or(MatchError::PlayerNotFound(player_id))?;
        player.connected = true;
        self.touch();
        Ok(())
    }

    /// Remove a player before the match starts. The remaining player keeps
    /// their seat index order.
    pub fn remove_player(&mut self, player_id: Uuid) -> Result<(), MatchError> {
        if self.status != MatchStatus::Waiting {
            return Err(MatchError::InvalidState(
                "players can only be removed before the match starts".to_string(),
            ));
        }
        let before = self.players.len();
        self.players.retain(|p| p.id != player_id);
        if self.players.len() == before {
            return Err(MatchError::PlayerNotFound(player_id));
        }
        // Re-seat so the first remaining player owns the left paddle.
        for (seat, player) in self.players.iter_mut().enumerate() {
            let slot = Paddle::for_side(Side::from_seat(seat), &self.config);
            player.paddle.x = slot.x;
        }
        self.touch();
        Ok(())
    }
}
