//! Per-match fixed-interval ticker

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::SERVER_TICK_DT;

use super::{CancelToken, MatchEngine, Scheduler};

struct Running {
    generation: u64,
    token: CancelToken,
}

/// Runs one timer per match, each calling [`MatchEngine::tick`]
pub struct MatchTicker {
    engine: Arc<MatchEngine>,
    scheduler: Arc<dyn Scheduler>,
    interval: Duration,
    running: DashMap<Uuid, Running>,
    generations: AtomicU64,
}

impl MatchTicker {
    pub fn new(engine: Arc<MatchEngine>, scheduler: Arc<dyn Scheduler>, interval: Duration) -> Self {
        Self {
            engine,
            scheduler,
            interval,
            running: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self, match_id: Uuid) -> bool {
        self.running
            .get(&match_id)
            .map(|r| r.token.is_active())
            .unwrap_or(false)
    }

    pub fn running_count(&self) -> usize {
        self.running.iter().filter(|r| r.token.is_active()).count()
    }

    /// Start ticking a match. A second call while it is running does nothing.
    pub fn start(self: &Arc<Self>, match_id: Uuid) {
        let entry = match self.running.entry(match_id) {
            Entry::Occupied(existing) if existing.get().token.is_active() => {
                debug!(match_id = %match_id, "Ticker already running");
                return;
            }
            entry => entry,
        };

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let ticker = Arc::downgrade(self);
        let engine = self.engine.clone();
        let token = self.scheduler.every(
            self.interval,
            Box::new(move || {
                let engine = engine.clone();
                let ticker = ticker.clone();
                async move {
                    let flow = match engine.tick(match_id, SERVER_TICK_DT).await {
                        Ok(status) if status.is_terminal() => {
                            info!(match_id = %match_id, ?status, "Match over, stopping ticker");
                            ControlFlow::Break(())
                        }
                        Ok(_) => ControlFlow::Continue(()),
                        Err(e) if !e.is_permanent() => {
                            warn!(match_id = %match_id, error = %e, "Tick failed, will retry");
                            ControlFlow::Continue(())
                        }
                        Err(e) => {
                            warn!(match_id = %match_id, error = %e, "Tick failed, stopping ticker");
                            ControlFlow::Break(())
                        }
                    };
                    if flow.is_break() {
                        if let Some(ticker) = ticker.upgrade() {
                            ticker
                                .running
                                .remove_if(&match_id, |_, r| r.generation == generation);
                        }
                    }
                    flow
                }
                .boxed()
            }),
        );

        match entry {
            Entry::Occupied(mut existing) => {
                existing.insert(Running { generation, token });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Running { generation, token });
            }
        }
        info!(match_id = %match_id, interval_ms = self.interval.as_millis() as u64, "Ticker started");
    }

    /// Stop ticking a match. Safe to call when nothing is running.
    pub fn stop(&self, match_id: Uuid) {
        if let Some((_, running)) = self.running.remove(&match_id) {
            running.token.cancel();
            debug!(match_id = %match_id, "Ticker stopped");
        }
    }

    /// Stop every ticker; in-flight ticks run to completion
    pub fn stop_all(&self) {
        let ids: Vec<Uuid> = self.running.iter().map(|r| *r.key()).collect();
        for id in ids {
            self.stop(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TokioScheduler;
    use crate::game::{MatchConfig, MatchStatus};
    use crate::testing::Harness;
    use crate::ws::protocol::ServerMsg;

    fn ticker(h: &Harness) -> Arc<MatchTicker> {
        Arc::new(MatchTicker::new(
            h.engine.clone(),
            Arc::new(TokioScheduler),
            Duration::from_millis(16),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_is_safe_to_repeat() {
        let h = Harness::new();
        let game = h.seed_started(MatchConfig::default(), [Uuid::new_v4(), Uuid::new_v4()]);
        let ticker = ticker(&h);

        ticker.start(game.id());
        ticker.start(game.id());
        assert_eq!(ticker.running_count(), 1);

        tokio::time::sleep(Duration::from_millis(16 * 5 + 8)).await;
        assert_eq!(
            h.broadcaster.count(|m| matches!(m, ServerMsg::BallState(_))),
            5
        );

        ticker.stop(game.id());
        ticker.stop(game.id());
        assert!(!ticker.is_running(game.id()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            h.broadcaster.count(|m| matches!(m, ServerMsg::BallState(_))),
            5
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_stops_itself_when_the_match_ends() {
        let h = Harness::new();
        let config = MatchConfig {
            score_limit: 1,
            ball_speed: 50.0,
            ..MatchConfig::default()
        };
        let game = h.seed_started(config, [Uuid::new_v4(), Uuid::new_v4()]);
        let ticker = ticker(&h);

        ticker.start(game.id());
        // Centre to goal line at 50 units per tick, minus a paddle bounce at most.
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(h.store.get(game.id()).unwrap().status, MatchStatus::Finished);
        assert!(!ticker.is_running(game.id()));
        assert_eq!(ticker.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_match_stops_the_ticker() {
        let h = Harness::new();
        let ticker = ticker(&h);
        let id = Uuid::new_v4();

        ticker.start(id);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!ticker.is_running(id));
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_match_stops_the_ticker() {
        let h = Harness::new();
        let game = h.seed_started(MatchConfig::default(), [Uuid::new_v4(), Uuid::new_v4()]);
        let mut record = h.store.get(game.id()).unwrap();
        record.snapshot["players"] = serde_json::json!(42);
        h.store.seed(record);
        let ticker = ticker(&h);

        ticker.start(game.id());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!ticker.is_running(game.id()));
        assert_eq!(ticker.running_count(), 0);
    }
}
