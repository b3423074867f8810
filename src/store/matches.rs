//! Match persistence: record shape, repository port and adapters

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::game::{Match, MatchMode, MatchSnapshot, MatchStatus};

use super::supabase::SupabaseClient;
use super::PortError;

const GAMES_TABLE: &str = "games";

/// Row stored for each match. The snapshot blob is opaque to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    pub status: MatchStatus,
    #[serde(default)]
    pub mode: MatchMode,
    pub snapshot: Value,
    #[serde(default)]
    pub tournament_id: Option<Uuid>,
    /// Seated players, kept outside the blob so stores can filter on it
    #[serde(default)]
    pub player_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl MatchRecord {
    pub fn from_match(game: &Match) -> Result<Self, PortError> {
        Ok(Self {
            id: game.id(),
            status: game.status(),
            mode: game.mode(),
            snapshot: serde_json::to_value(MatchSnapshot::from(game))?,
            tournament_id: game.tournament_id(),
            player_ids: game.players().iter().map(|p| p.id).collect(),
            created_at: game.created_at(),
            updated_at: game.updated_at(),
            started_at: game.started_at(),
            finished_at: game.finished_at(),
        })
    }

    /// Decode the snapshot blob, filling identity and status from the row
    /// columns when the blob lacks them.
    pub fn decode_snapshot(&self) -> Result<MatchSnapshot, PortError> {
        let mut blob = match &self.snapshot {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        blob.entry("id")
            .or_insert_with(|| Value::String(self.id.to_string()));
        blob.entry("status")
            .or_insert(serde_json::to_value(self.status)?);
        blob.entry("mode").or_insert(serde_json::to_value(self.mode)?);
        blob.entry("createdAt")
            .or_insert(serde_json::to_value(self.created_at)?);
        blob.entry("updatedAt")
            .or_insert(serde_json::to_value(self.updated_at)?);
        if let Some(tournament_id) = self.tournament_id {
            blob.entry("tournamentId")
                .or_insert(Value::String(tournament_id.to_string()));
        }
        Ok(serde_json::from_value(Value::Object(blob))?)
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Persistence port for match snapshots
#[async_trait]
pub trait MatchRepository: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<Option<MatchRecord>, PortError>;

    async fn save(&self, record: &MatchRecord) -> Result<(), PortError>;

    /// Non-terminal matches in which the player is seated
    async fn active_for_player(&self, player_id: Uuid) -> Result<Vec<MatchRecord>, PortError>;
}

/// Supabase-backed repository (`games` table)
#[derive(Clone)]
pub struct SupabaseMatchStore {
    client: SupabaseClient,
}

impl SupabaseMatchStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MatchRepository for SupabaseMatchStore {
    async fn load(&self, id: Uuid) -> Result<Option<MatchRecord>, PortError> {
        let query = format!("id=eq.{}", id);
        Ok(self.client.get_one(GAMES_TABLE, &query).await?)
    }

    async fn save(&self, record: &MatchRecord) -> Result<(), PortError> {
        Ok(self.client.upsert(GAMES_TABLE, record, "id").await?)
    }

    async fn active_for_player(&self, player_id: Uuid) -> Result<Vec<MatchRecord>, PortError> {
        let query = format!(
            "player_ids=cs.{{{}}}&status=in.(WAITING,IN_PROGRESS)",
            player_id
        );
        Ok(self.client.get(GAMES_TABLE, &query).await?)
    }
}

/// In-process repository used in development and tests
#[derive(Default)]
pub struct InMemoryMatchStore {
    records: DashMap<Uuid, MatchRecord>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record directly, bypassing the save counter
    pub fn seed(&self, record: MatchRecord) {
        self.records.insert(record.id, record);
    }

    pub fn get(&self, id: Uuid) -> Option<MatchRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    /// Make every call fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), PortError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(PortError::Unavailable("in-memory store set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MatchRepository for InMemoryMatchStore {
    async fn load(&self, id: Uuid) -> Result<Option<MatchRecord>, PortError> {
        self.check_available()?;
        Ok(self.get(id))
    }

    async fn save(&self, record: &MatchRecord) -> Result<(), PortError> {
        self.check_available()?;
        self.records.insert(record.id, record.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn active_for_player(&self, player_id: Uuid) -> Result<Vec<MatchRecord>, PortError> {
        self.check_available()?;
        Ok(self
            .records
            .iter()
            .filter(|r| r.is_active() && r.player_ids.contains(&player_id))
            .map(|r| r.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::MatchConfig;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_store_round_trips_and_filters_active() {
        let store = InMemoryMatchStore::new();
        let p1 = Uuid::new_v4();
        let game = Match::new(
            Uuid::new_v4(),
            MatchMode::Classic,
            None,
            MatchConfig::default(),
            &[p1, Uuid::new_v4()],
        )
        .unwrap();
        let record = MatchRecord::from_match(&game).unwrap();
        store.save(&record).await.unwrap();

        assert_eq!(store.load(game.id()).await.unwrap(), Some(record.clone()));
        assert_eq!(store.active_for_player(p1).await.unwrap().len(), 1);
        assert!(store
            .active_for_player(Uuid::new_v4())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.save_count(), 1);

        store.set_failing(true);
        assert!(store.save(&record).await.is_err());
    }

    #[test]
    fn decode_fills_missing_blob_fields_from_columns() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = MatchRecord {
            id,
            status: MatchStatus::Waiting,
            mode: MatchMode::Custom,
            snapshot: json!({ "ball": { "x": 1.0 } }),
            tournament_id: None,
            player_ids: vec![],
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        };
        let snapshot = record.decode_snapshot().unwrap();
        assert_eq!(snapshot.id, id);
        assert_eq!(snapshot.status, MatchStatus::Waiting);
        assert_eq!(snapshot.mode, MatchMode::Custom);
        assert_eq!(snapshot.ball.x, Some(1.0));
        assert_eq!(snapshot.ball.y, None);
    }
}
