//! Shared fixtures for unit tests

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::engine::{EngineSettings, MatchBroadcaster, MatchEngine};
use crate::events::{EventBus, IntegrationEvent};
use crate::game::{Match, MatchConfig, MatchMode};
use crate::store::{InMemoryMatchStore, InMemoryUserDirectory, MatchRecord};
use crate::ws::protocol::ServerMsg;

/// Broadcaster that keeps everything it was asked to send
#[derive(Default)]
pub struct RecordingBroadcaster {
    sent: Mutex<Vec<(Uuid, ServerMsg)>>,
}

impl RecordingBroadcaster {
    pub fn messages(&self) -> Vec<ServerMsg> {
        self.sent.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn count(&self, pred: impl Fn(&ServerMsg) -> bool) -> usize {
        self.sent.lock().iter().filter(|(_, m)| pred(m)).count()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl MatchBroadcaster for RecordingBroadcaster {
    fn broadcast(&self, match_id: Uuid, msg: ServerMsg) {
        self.sent.lock().push((match_id, msg));
    }
}

pub struct Harness {
    pub store: Arc<InMemoryMatchStore>,
    pub bus: EventBus,
    pub events: broadcast::Receiver<IntegrationEvent>,
    pub users: Arc<InMemoryUserDirectory>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub engine: Arc<MatchEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings {
            user_lookup_timeout: Duration::from_millis(50),
            ..EngineSettings::default()
        })
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let store = Arc::new(InMemoryMatchStore::new());
        let bus = EventBus::new();
        let events = bus.subscribe();
        let users = Arc::new(InMemoryUserDirectory::new());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let engine = Arc::new(MatchEngine::new(
            store.clone(),
            Arc::new(bus.clone()),
            users.clone(),
            broadcaster.clone(),
            settings,
        ));
        Self {
            store,
            bus,
            events,
            users,
            broadcaster,
            engine,
        }
    }

    /// Store a fresh WAITING match and return it
    pub fn seed(&self, players: &[Uuid]) -> Match {
        self.seed_with(MatchConfig::default(), players)
    }

    pub fn seed_with(&self, config: MatchConfig, players: &[Uuid]) -> Match {
        let game = Match::new(Uuid::new_v4(), MatchMode::Classic, None, config, players).unwrap();
        self.store.seed(MatchRecord::from_match(&game).unwrap());
        game
    }

    /// Store a two-player match that is already IN_PROGRESS
    pub fn seed_started(&self, config: MatchConfig, players: [Uuid; 2]) -> Match {
        let mut game =
            Match::new(Uuid::new_v4(), MatchMode::Classic, None, config, &players).unwrap();
        game.start().unwrap();
        self.store.seed(MatchRecord::from_match(&game).unwrap());
        game
    }

    /// Events published so far, in order
    pub fn drain_events(&mut self) -> Vec<IntegrationEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
