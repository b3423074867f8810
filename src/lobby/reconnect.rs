//! Grace period for players who drop out of a lobby

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{CancelToken, EngineError, MatchBroadcaster, MatchEngine, Scheduler};
use crate::game::MatchStatus;
use crate::ws::protocol::ServerMsg;

struct GraceTimer {
    generation: u64,
    token: CancelToken,
}

/// Tracks one removal timer per (match, player) while the match is WAITING
pub struct ReconnectGrace {
    engine: Arc<MatchEngine>,
    scheduler: Arc<dyn Scheduler>,
    broadcaster: Arc<dyn MatchBroadcaster>,
    grace: Duration,
    timers: DashMap<(Uuid, Uuid), GraceTimer>,
    generations: AtomicU64,
}

impl ReconnectGrace {
    pub fn new(
        engine: Arc<MatchEngine>,
        scheduler: Arc<dyn Scheduler>,
        broadcaster: Arc<dyn MatchBroadcaster>,
        grace: Duration,
    ) -> Self {
        Self {
            engine,
            scheduler,
            broadcaster,
            grace,
            timers: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    /// Flag the player disconnected. In the lobby this also arms (or
    /// re-arms) the removal timer; once the match is live nothing else
    /// happens.
    pub async fn on_disconnect(
        self: &Arc<Self>,
        match_id: Uuid,
        player_id: Uuid,
    ) -> Result<(), EngineError> {
        let status = self
            .engine
            .update_and_persist(match_id, |game| {
                if !game.has_player(player_id) || game.status().is_terminal() {
                    return Ok(None);
                }
                game.disconnect_player(player_id)?;
                Ok(Some(game.status()))
            })
            .await?;

        match status {
            Some(MatchStatus::Waiting) => {
                self.arm(match_id, player_id);
                info!(
                    match_id = %match_id,
                    player_id = %player_id,
                    grace_secs = self.grace.as_secs(),
                    "Lobby player disconnected"
                );
            }
            Some(_) => {
                info!(match_id = %match_id, player_id = %player_id, "Player dropped from live match");
            }
            None => {}
        }
        Ok(())
    }

    /// Cancel any pending removal and flag the player connected again.
    /// Returns whether the player is still seated in the match.
    pub async fn on_reconnect(&self, match_id: Uuid, player_id: Uuid) -> Result<bool, EngineError> {
        self.cancel(match_id, player_id);
        let seated = self
            .engine
            .update_and_persist(match_id, |game| {
                if !game.has_player(player_id) {
                    return Ok(false);
                }
                game.reconnect_player(player_id)?;
                Ok(true)
            })
            .await?;
        if seated {
            debug!(match_id = %match_id, player_id = %player_id, "Player reconnected");
        }
        Ok(seated)
    }

    pub fn is_pending(&self, match_id: Uuid, player_id: Uuid) -> bool {
        self.timers
            .get(&(match_id, player_id))
            .map(|t| t.token.is_active())
            .unwrap_or(false)
    }

    pub fn cancel(&self, match_id: Uuid, player_id: Uuid) {
        if let Some((_, timer)) = self.timers.remove(&(match_id, player_id)) {
            timer.token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        let keys: Vec<(Uuid, Uuid)> = self.timers.iter().map(|t| *t.key()).collect();
        for (match_id, player_id) in keys {
            self.cancel(match_id, player_id);
        }
    }

    fn arm(self: &Arc<Self>, match_id: Uuid, player_id: Uuid) {
        let key = (match_id, player_id);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let grace = Arc::downgrade(self);
        let token = self.scheduler.after(
            self.grace,
            Box::pin(async move {
                let Some(grace) = grace.upgrade() else {
                    return;
                };
                grace
                    .timers
                    .remove_if(&key, |_, t| t.generation == generation);
                if let Err(e) = grace.expire(match_id, player_id).await {
                    warn!(match_id = %match_id, player_id = %player_id, error = %e, "Grace expiry failed");
                }
            }),
        );
        if let Some(previous) = self.timers.insert(key, GraceTimer { generation, token }) {
            previous.token.cancel();
        }
    }

    /// Grace period ran out: drop the player, and the match with them if
    /// nobody is left
    async fn expire(&self, match_id: Uuid, player_id: Uuid) -> Result<(), EngineError> {
        let frame = self
            .engine
            .update_and_persist(match_id, |game| {
                let still_away = game.player(player_id).map(|p| !p.connected).unwrap_or(false);
                if game.status() != MatchStatus::Waiting || !still_away {
                    return Ok(None);
                }
                game.remove_player(player_id)?;
                if game.players().is_empty() {
                    game.cancel()?;
                }
                Ok(Some((game.status(), ServerMsg::game_state(game))))
            })
            .await?;

        if let Some((status, frame)) = frame {
            info!(match_id = %match_id, player_id = %player_id, ?status, "Removed player after grace period");
            if status == MatchStatus::Waiting {
                self.broadcaster.broadcast(match_id, frame);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TokioScheduler;
    use crate::game::MatchConfig;
    use crate::testing::Harness;

    fn grace(h: &Harness) -> Arc<ReconnectGrace> {
        Arc::new(ReconnectGrace::new(
            h.engine.clone(),
            Arc::new(TokioScheduler),
            h.broadcaster.clone(),
            Duration::from_secs(30),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_grace_keeps_seat() {
        let h = Harness::new();
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let game = h.seed(&[p1, p2]);
        let grace = grace(&h);

        grace.on_disconnect(game.id(), p1).await.unwrap();
        assert!(grace.is_pending(game.id(), p1));
        let snapshot = h.store.get(game.id()).unwrap().decode_snapshot().unwrap();
        assert!(!snapshot.players[0].connected);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(grace.on_reconnect(game.id(), p1).await.unwrap());
        assert!(!grace.is_pending(game.id(), p1));

        tokio::time::sleep(Duration::from_secs(60)).await;
        let current = h.engine.inspect(game.id()).await.unwrap();
        assert_eq!(current.players().len(), 2);
        assert!(current.player(p1).unwrap().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_grace_removes_player_then_cancels_empty_match() {
        let h = Harness::new();
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let game = h.seed(&[p1, p2]);
        let grace = grace(&h);

        grace.on_disconnect(game.id(), p1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        let record = h.store.get(game.id()).unwrap();
        assert_eq!(record.status, MatchStatus::Waiting);
        assert_eq!(record.player_ids, vec![p2]);
        assert!(!grace.on_reconnect(game.id(), p1).await.unwrap());

        grace.on_disconnect(game.id(), p2).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        let record = h.store.get(game.id()).unwrap();
        assert_eq!(record.status, MatchStatus::Cancelled);
        assert!(record.player_ids.is_empty());
        assert!(!h.engine.is_cached(game.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn second_disconnect_restarts_the_window() {
        let h = Harness::new();
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let game = h.seed(&[p1, p2]);
        let grace = grace(&h);

        grace.on_disconnect(game.id(), p1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        grace.on_disconnect(game.id(), p1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.store.get(game.id()).unwrap().player_ids.len(), 2);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.store.get(game.id()).unwrap().player_ids, vec![p2]);
    }

    #[tokio::test(start_paused = true)]
    async fn live_match_disconnect_only_flags_player() {
        let h = Harness::new();
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let game = h.seed_started(MatchConfig::default(), [p1, p2]);
        let grace = grace(&h);

        grace.on_disconnect(game.id(), p1).await.unwrap();
        assert!(!grace.is_pending(game.id(), p1));

        tokio::time::sleep(Duration::from_secs(60)).await;
        let current = h.engine.inspect(game.id()).await.unwrap();
        assert_eq!(current.players().len(), 2);
        assert!(!current.player(p1).unwrap().connected);
        assert_eq!(current.status(), MatchStatus::InProgress);
    }
}
