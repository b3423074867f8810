//! Ready-up handshake and the forfeit timeout

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{CancelToken, EngineError, MatchEngine, MatchTicker, Scheduler};
use crate::events::{EventPublisher, GameLifecycle, IntegrationEvent};
use crate::game::{MatchError, MatchStatus, Score, Side};

struct PendingTimeout {
    generation: u64,
    token: CancelToken,
}

/// Starts matches once both players are ready and forfeits those that
/// never get there
pub struct ReadyCoordinator {
    engine: Arc<MatchEngine>,
    ticker: Arc<MatchTicker>,
    scheduler: Arc<dyn Scheduler>,
    events: Arc<dyn EventPublisher>,
    timeout: Duration,
    timeouts: DashMap<Uuid, PendingTimeout>,
    generations: AtomicU64,
}

impl ReadyCoordinator {
    pub fn new(
        engine: Arc<MatchEngine>,
        ticker: Arc<MatchTicker>,
        scheduler: Arc<dyn Scheduler>,
        events: Arc<dyn EventPublisher>,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            ticker,
            scheduler,
            events,
            timeout,
            timeouts: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    /// Mark a player ready. Returns `true` only for the call that started
    /// the match.
    pub async fn ready_up(&self, match_id: Uuid, player_id: Uuid) -> Result<bool, EngineError> {
        let started = self
            .engine
            .update_and_persist(match_id, |game| {
                if !game.has_player(player_id) {
                    return Err(MatchError::PlayerNotFound(player_id));
                }
                if game.status().is_terminal() {
                    return Err(MatchError::InvalidState(format!(
                        "match is already {:?}",
                        game.status()
                    )));
                }
                let all_ready = game.mark_ready(player_id)?;
                if all_ready && game.status() == MatchStatus::Waiting && game.players().len() == 2
                {
                    game.start()?;
                    return Ok(Some(GameLifecycle::of(game)));
                }
                Ok(None)
            })
            .await?;

        let Some(lifecycle) = started else {
            debug!(match_id = %match_id, player_id = %player_id, "Player ready");
            return Ok(false);
        };

        info!(match_id = %match_id, "Both players ready, starting match");
        self.cancel_ready_timeout(match_id);
        self.ticker.start(match_id);
        if let Err(e) = self
            .events
            .publish(IntegrationEvent::GameStarted(lifecycle))
            .await
        {
            warn!(match_id = %match_id, error = %e, "Failed to publish game.started");
        }
        Ok(true)
    }

    /// Arm the forfeit timer for a match. Does nothing if one is already
    /// pending.
    pub fn schedule_ready_timeout(self: &Arc<Self>, match_id: Uuid) {
        if let Some(pending) = self.timeouts.get(&match_id) {
            if pending.token.is_active() {
                return;
            }
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let coordinator = Arc::downgrade(self);
        let token = self.scheduler.after(
            self.timeout,
            Box::pin(async move {
                let Some(coordinator) = coordinator.upgrade() else {
                    return;
                };
                coordinator
                    .timeouts
                    .remove_if(&match_id, |_, p| p.generation == generation);
                if let Err(e) = coordinator.forfeit(match_id).await {
                    warn!(match_id = %match_id, error = %e, "Forfeit failed");
                }
            }),
        );
        if let Some(previous) = self
            .timeouts
            .insert(match_id, PendingTimeout { generation, token })
        {
            previous.token.cancel();
        }
        debug!(match_id = %match_id, timeout_secs = self.timeout.as_secs(), "Ready timeout armed");
    }

    pub fn cancel_ready_timeout(&self, match_id: Uuid) {
        if let Some((_, pending)) = self.timeouts.remove(&match_id) {
            pending.token.cancel();
            debug!(match_id = %match_id, "Ready timeout cancelled");
        }
    }

    pub fn has_pending_timeout(&self, match_id: Uuid) -> bool {
        self.timeouts
            .get(&match_id)
            .map(|p| p.token.is_active())
            .unwrap_or(false)
    }

    pub fn cancel_all(&self) {
        let ids: Vec<Uuid> = self.timeouts.iter().map(|p| *p.key()).collect();
        for id in ids {
            self.cancel_ready_timeout(id);
        }
    }

    /// Resolve a lobby that never finished readying up. The ready player
    /// wins, or the first seat if nobody is ready. Returns whether the match
    /// was forfeited.
    pub async fn forfeit(&self, match_id: Uuid) -> Result<bool, EngineError> {
        let winner = self
            .engine
            .apply_external_update(match_id, |game| {
                if game.status() != MatchStatus::Waiting
                    || game.players().len() != 2
                    || game.ready_count() >= 2
                {
                    return Ok(None);
                }
                let seat = game.players().iter().position(|p| p.ready).unwrap_or(0);
                let side = Side::from_seat(seat);
                let limit = game.config().score_limit;
                let score = match side {
                    Side::Left => Score::new(limit, 0),
                    Side::Right => Score::new(0, limit),
                };
                let winner = game.players()[seat].id;
                game.update_score(score);
                game.finish()?;
                Ok(Some(winner))
            })
            .await?;

        match winner {
            Some(winner) => {
                info!(match_id = %match_id, winner = %winner, "Match forfeited");
                Ok(true)
            }
            None => {
                debug!(match_id = %match_id, "Forfeit skipped");
                Ok(false)
            }
        }
    }
}
