//! Handles the integration events this service subscribes to

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::{EngineError, MatchBroadcaster, MatchEngine, MatchTicker};
use crate::game::{Match, MatchConfig, MatchMode, MatchStatus, Score, Side};
use crate::lobby::ReadyCoordinator;
use crate::store::{MatchRecord, MatchRepository};
use crate::ws::protocol::{GameCancelled, ServerMsg};

use super::{EventPublisher, GameLifecycle, IntegrationEvent, Pairing, TournamentStarted};

/// Reason sent with `game_cancelled` when the opponent's account is gone
pub const REASON_OPPONENT_DELETED: &str = "opponent_deleted";

pub struct EventConsumer {
    engine: Arc<MatchEngine>,
    store: Arc<dyn MatchRepository>,
    events: Arc<dyn EventPublisher>,
    ready: Arc<ReadyCoordinator>,
    ticker: Arc<MatchTicker>,
    broadcaster: Arc<dyn MatchBroadcaster>,
}

impl EventConsumer {
    pub fn new(
        engine: Arc<MatchEngine>,
        store: Arc<dyn MatchRepository>,
        events: Arc<dyn EventPublisher>,
        ready: Arc<ReadyCoordinator>,
        ticker: Arc<MatchTicker>,
        broadcaster: Arc<dyn MatchBroadcaster>,
    ) -> Self {
        Self {
            engine,
            store,
            events,
            ready,
            ticker,
            broadcaster,
        }
    }

    /// Consume events until the bus closes
    pub async fn run(self: Arc<Self>, mut rx: broadcast::Receiver<IntegrationEvent>) {
        info!("Event consumer started");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let topic = event.topic();
                    if let Err(e) = self.handle(event).await {
                        error!(topic, error = %e, "Failed to handle integration event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event consumer lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed");
                    break;
                }
            }
        }
    }

    pub async fn handle(&self, event: IntegrationEvent) -> Result<(), EngineError> {
        match event {
            IntegrationEvent::TournamentStarted(started) => self.seed_tournament(started).await,
            IntegrationEvent::UserDeleted(deleted) => self.remove_user(deleted.user_id).await,
            // Our own lifecycle events come back through the bus.
            IntegrationEvent::GameCreated(_)
            | IntegrationEvent::GameStarted(_)
            | IntegrationEvent::GameFinished(_) => Ok(()),
        }
    }

    /// Create a WAITING match for every pairing whose players are both free
    async fn seed_tournament(&self, started: TournamentStarted) -> Result<(), EngineError> {
        let mut created = 0usize;
        for pairing in &started.pairings {
            if self.has_active_match(pairing).await? {
                info!(
                    tournament_id = %started.tournament_id,
                    player1 = %pairing.player1_id,
                    player2 = %pairing.player2_id,
                    "Skipping pairing, a player is already in a match"
                );
                continue;
            }

            let game = match Match::new(
                Uuid::new_v4(),
                MatchMode::Tournament,
                Some(started.tournament_id),
                MatchConfig::default(),
                &[pairing.player1_id, pairing.player2_id],
            ) {
                Ok(game) => game,
                Err(e) => {
                    warn!(tournament_id = %started.tournament_id, error = %e, "Invalid pairing");
                    continue;
                }
            };

            self.store.save(&MatchRecord::from_match(&game)?).await?;
            if let Err(e) = self
                .events
                .publish(IntegrationEvent::GameCreated(GameLifecycle::of(&game)))
                .await
            {
                warn!(match_id = %game.id(), error = %e, "Failed to publish game.created");
            }
            self.ready.schedule_ready_timeout(game.id());
            created += 1;
        }

        info!(
            tournament_id = %started.tournament_id,
            pairings = started.pairings.len(),
            created,
            "Seeded tournament matches"
        );
        Ok(())
    }

    async fn has_active_match(&self, pairing: &Pairing) -> Result<bool, EngineError> {
        for player in [pairing.player1_id, pairing.player2_id] {
            if !self.store.active_for_player(player).await?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Close every open match of a deleted user. Lobbies are cancelled; a
    /// live match is awarded to the opponent.
    async fn remove_user(&self, user_id: Uuid) -> Result<(), EngineError> {
        let records = self.store.active_for_player(user_id).await?;
        for record in records {
            let match_id = record.id;
            let outcome = self
                .engine
                .update_and_persist(match_id, |game| {
                    let Some(side) = game.player_side(user_id) else {
                        return Ok(None);
                    };
                    match game.status() {
                        MatchStatus::Waiting => game.cancel()?,
                        MatchStatus::InProgress => {
                            let limit = game.config().score_limit;
                            let left = game.score().get(side);
                            let score = match side {
                                Side::Left => Score::new(left, limit),
                                Side::Right => Score::new(limit, left),
                            };
                            game.update_score(score);
                            game.finish()?;
                        }
                        MatchStatus::Finished | MatchStatus::Cancelled => return Ok(None),
                    }
                    Ok(Some(game.status()))
                })
                .await;

            match outcome {
                Ok(Some(status)) => {
                    self.ready.cancel_ready_timeout(match_id);
                    self.ticker.stop(match_id);
                    self.broadcaster.broadcast(
                        match_id,
                        ServerMsg::GameCancelled(GameCancelled {
                            game_id: match_id,
                            reason: REASON_OPPONENT_DELETED.to_string(),
                        }),
                    );
                    info!(match_id = %match_id, user_id = %user_id, ?status, "Closed match of deleted user");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(match_id = %match_id, user_id = %user_id, error = %e, "Failed to close match of deleted user");
                }
            }
        }
        Ok(())
    }
}
