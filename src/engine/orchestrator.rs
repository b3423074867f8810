//! Match cache and tick orchestrator
//!
//! Every live match has exactly one cached instance. Physics ticks and
//! external updates for a match are serialized on that entry's lock, while
//! different matches progress independently.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::events::{EventPublisher, GameFinished, IntegrationEvent};
use crate::game::{advance, Match, MatchError, MatchStatus, Score};
use crate::store::{MatchRecord, MatchRepository, PortError, UserDirectory};
use crate::ws::protocol::{FinalScore, GameFinishedFrame, ServerMsg};

use super::MatchBroadcaster;

/// Orchestrator tuning
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Persist an in-progress match every N ticks
    pub persist_every_ticks: u32,
    /// Repairs tolerated per match id before loading fails
    pub max_snapshot_repairs: u32,
    /// Upper bound on the winner username lookup
    pub user_lookup_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            persist_every_ticks: 10,
            max_snapshot_repairs: 3,
            user_lookup_timeout: Duration::from_millis(500),
        }
    }
}

/// Orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Match {0} not found")]
    MatchNotFound(Uuid),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error("Port failure: {0}")]
    Port(#[from] PortError),
}

impl EngineError {
    /// Errors that will not go away by retrying the same call
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Port(PortError::Encoding(_)) => true,
            Self::Port(_) => false,
            _ => true,
        }
    }
}

/// Live match plus persistence/broadcast bookkeeping
struct CacheEntry {
    game: Match,
    ticks_since_persist: u32,
    last_broadcast_score: Score,
    last_broadcast_status: MatchStatus,
    /// Set after a repair or a failed save; cleared by the next successful save
    dirty: bool,
}

impl CacheEntry {
    fn new(game: Match, dirty: bool) -> Self {
        Self {
            last_broadcast_score: game.score(),
            last_broadcast_status: game.status(),
            ticks_since_persist: 0,
            dirty,
            game,
        }
    }
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Owner of the active-match cache
pub struct MatchEngine {
    cache: DashMap<Uuid, Slot>,
    repairs: DashMap<Uuid, u32>,
    store: Arc<dyn MatchRepository>,
    events: Arc<dyn EventPublisher>,
    users: Arc<dyn UserDirectory>,
    broadcaster: Arc<dyn MatchBroadcaster>,
    rng: SyncMutex<ChaCha8Rng>,
    settings: EngineSettings,
}

impl MatchEngine {
    pub fn new(
        store: Arc<dyn MatchRepository>,
        events: Arc<dyn EventPublisher>,
        users: Arc<dyn UserDirectory>,
        broadcaster: Arc<dyn MatchBroadcaster>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            cache: DashMap::new(),
            repairs: DashMap::new(),
            store,
            events,
            users,
            broadcaster,
            rng: SyncMutex::new(ChaCha8Rng::from_entropy()),
            settings,
        }
    }

    /// Number of matches currently held in memory
    pub fn cached_matches(&self) -> usize {
        self.cache.len()
    }

    pub fn is_cached(&self, match_id: Uuid) -> bool {
        self.cache.contains_key(&match_id)
    }

    /// Advance one match by one tick and return its status afterwards
    pub async fn tick(&self, match_id: Uuid, dt: f64) -> Result<MatchStatus, EngineError> {
        let (slot, mut guard) = self.lock_entry(match_id).await?;
        let Some(entry) = guard.as_mut() else {
            return Err(EngineError::MatchNotFound(match_id));
        };

        if entry.game.status() != MatchStatus::InProgress {
            // Late observers still get the last frame.
            self.broadcaster
                .broadcast(match_id, ServerMsg::game_state(&entry.game));
            if entry.dirty {
                self.persist(entry).await;
            }
            let status = entry.game.status();
            self.release(match_id, &slot, guard);
            return Ok(status);
        }

        {
            let mut rng = self.rng.lock();
            advance(&mut entry.game, dt, &mut *rng)?;
        }

        self.broadcaster
            .broadcast(match_id, ServerMsg::ball_state(&entry.game));

        let status = entry.game.status();
        let score = entry.game.score();
        let score_changed = score != entry.last_broadcast_score;
        let status_changed = status != entry.last_broadcast_status;

        if score_changed || status_changed {
            self.broadcaster
                .broadcast(match_id, ServerMsg::game_state(&entry.game));
            entry.last_broadcast_score = score;
            entry.last_broadcast_status = status;
        }

        entry.ticks_since_persist += 1;
        let due = entry.ticks_since_persist >= self.settings.persist_every_ticks;
        if due || score_changed || status_changed || entry.dirty {
            self.persist(entry).await;
        }

        let finished = (status == MatchStatus::Finished && status_changed)
            .then(|| entry.game.clone());
        self.release(match_id, &slot, guard);

        if let Some(game) = finished {
            info!(
                match_id = %match_id,
                player1 = score.player1,
                player2 = score.player2,
                "Match finished"
            );
            self.announce_finish(&game).await;
        }

        Ok(status)
    }

    /// Apply an input-driven mutation to the cached match without forcing a
    /// save; in-progress matches are persisted by the tick policy. A status
    /// change is still persisted and broadcast immediately.
    pub async fn apply_external_update<T, F>(&self, match_id: Uuid, mutator: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Match) -> Result<T, MatchError>,
    {
        self.mutate(match_id, false, mutator).await
    }

    /// Apply a lobby mutation and save it right away
    pub async fn update_and_persist<T, F>(&self, match_id: Uuid, mutator: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Match) -> Result<T, MatchError>,
    {
        self.mutate(match_id, true, mutator).await
    }

    /// Copy of the current state (loads it into the cache if needed)
    pub async fn inspect(&self, match_id: Uuid) -> Result<Match, EngineError> {
        self.mutate(match_id, false, |game| Ok(game.clone())).await
    }

    async fn mutate<T, F>(&self, match_id: Uuid, persist: bool, mutator: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Match) -> Result<T, MatchError>,
    {
        let (slot, mut guard) = self.lock_entry(match_id).await?;
        let Some(entry) = guard.as_mut() else {
            return Err(EngineError::MatchNotFound(match_id));
        };

        let status_before = entry.game.status();
        let result = mutator(&mut entry.game);
        let status = entry.game.status();
        let status_changed = status != status_before;

        if status_changed {
            debug!(match_id = %match_id, from = ?status_before, to = ?status, "Status changed");
            self.broadcaster
                .broadcast(match_id, ServerMsg::game_state(&entry.game));
            entry.last_broadcast_score = entry.game.score();
            entry.last_broadcast_status = status;
        }

        if result.is_ok() && (persist || status_changed) || entry.dirty {
            self.persist(entry).await;
        }

        let finished = (status == MatchStatus::Finished && status_changed)
            .then(|| entry.game.clone());
        self.release(match_id, &slot, guard);

        if let Some(game) = finished {
            info!(match_id = %match_id, "Match finished outside the tick loop");
            self.announce_finish(&game).await;
        }

        Ok(result?)
    }

    /// Save every cached match; used on shutdown
    pub async fn flush_all(&self) {
        let slots: Vec<Slot> = self.cache.iter().map(|e| e.value().clone()).collect();
        for slot in slots {
            let mut guard = slot.lock().await;
            if let Some(entry) = guard.as_mut() {
                self.persist(entry).await;
            }
        }
        info!(matches = self.cache.len(), "Flushed match cache");
    }

    /// Lock the cache slot for `match_id`, loading it on first touch
    async fn lock_entry(
        &self,
        match_id: Uuid,
    ) -> Result<(Slot, OwnedMutexGuard<Option<CacheEntry>>), EngineError> {
        let slot = self
            .cache
            .entry(match_id)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .value()
            .clone();
        let mut guard = slot.clone().lock_owned().await;

        if guard.is_none() {
            match self.load(match_id).await {
                Ok(mut entry) => {
                    if entry.dirty {
                        self.persist(&mut entry).await;
                    }
                    *guard = Some(entry);
                }
                Err(e) => {
                    self.cache
                        .remove_if(&match_id, |_, s| Arc::ptr_eq(s, &slot));
                    return Err(e);
                }
            }
        }

        Ok((slot, guard))
    }

    async fn load(&self, match_id: Uuid) -> Result<CacheEntry, EngineError> {
        let record = self
            .store
            .load(match_id)
            .await?
            .ok_or(EngineError::MatchNotFound(match_id))?;
        let snapshot = record.decode_snapshot()?;

        let (game, repaired) = {
            let mut rng = self.rng.lock();
            snapshot.restore(&mut *rng)
        };

        if repaired {
            let mut count = self.repairs.entry(match_id).or_insert(0);
            *count += 1;
            if *count > self.settings.max_snapshot_repairs {
                error!(
                    match_id = %match_id,
                    repairs = *count,
                    "Snapshot keeps coming back corrupted, refusing to load"
                );
                return Err(MatchError::InvalidState(format!(
                    "snapshot for match {} was repaired {} times",
                    match_id, *count
                ))
                .into());
            }
            warn!(match_id = %match_id, repairs = *count, "Repaired corrupted match snapshot");
        }

        trace!(match_id = %match_id, status = ?game.status(), "Loaded match into cache");
        Ok(CacheEntry::new(game, repaired))
    }

    /// Save a cache entry. Failures are logged and retried on the next touch.
    async fn persist(&self, entry: &mut CacheEntry) {
        let record = match MatchRecord::from_match(&entry.game) {
            Ok(record) => record,
            Err(e) => {
                error!(match_id = %entry.game.id(), error = %e, "Failed to encode match snapshot");
                return;
            }
        };
        match self.store.save(&record).await {
            Ok(()) => {
                entry.ticks_since_persist = 0;
                entry.dirty = false;
            }
            Err(e) => {
                entry.dirty = true;
                warn!(match_id = %entry.game.id(), error = %e, "Failed to persist match");
            }
        }
    }

    /// Drop the lock and evict the entry if the match reached a terminal state
    fn release(&self, match_id: Uuid, slot: &Slot, mut guard: OwnedMutexGuard<Option<CacheEntry>>) {
        let terminal = guard
            .as_ref()
            .map(|e| e.game.status().is_terminal() && !e.dirty)
            .unwrap_or(true);
        if terminal {
            *guard = None;
            self.cache.remove_if(&match_id, |_, s| Arc::ptr_eq(s, slot));
            trace!(match_id = %match_id, "Evicted match from cache");
        }
        drop(guard);
    }

    /// Broadcast `game:finished` and publish `game.finished`.
    /// The username lookup is bounded and never prevents either.
    async fn announce_finish(&self, game: &Match) {
        let winner_id = game.winner();
        let winner_username = match winner_id {
            Some(id) => self.lookup_username(id).await,
            None => None,
        };
        let score = game.score();
        let frame = GameFinishedFrame {
            game_id: game.id(),
            winner_id,
            winner_username,
            final_score: FinalScore {
                left: score.player1,
                right: score.player2,
            },
            finished_at: game.finished_at().unwrap_or_else(chrono::Utc::now),
        };
        self.broadcaster
            .broadcast(game.id(), ServerMsg::GameFinished(frame));

        if let Err(e) = self
            .events
            .publish(IntegrationEvent::GameFinished(GameFinished::of(game)))
            .await
        {
            warn!(match_id = %game.id(), error = %e, "Failed to publish game.finished");
        }
    }

    async fn lookup_username(&self, user_id: Uuid) -> Option<String> {
        let lookup = self.users.user_summary(user_id);
        match tokio::time::timeout(self.settings.user_lookup_timeout, lookup).await {
            Ok(Ok(summary)) => summary.map(|s| s.username),
            Ok(Err(e)) => {
                warn!(user_id = %user_id, error = %e, "Winner lookup failed");
                None
            }
            Err(_) => {
                warn!(user_id = %user_id, "Winner lookup timed out");
                None
            }
        }
    }
}
