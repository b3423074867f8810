//! Application state shared across routes

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::{MatchEngine, MatchTicker, Scheduler, TokioScheduler};
use crate::events::{EventBus, EventConsumer};
use crate::lobby::{ReadyCoordinator, ReconnectGrace};
use crate::store::{
    InMemoryMatchStore, InMemoryUserDirectory, MatchRepository, SupabaseClient,
    SupabaseMatchStore, SupabaseUserDirectory, UserDirectory,
};
use crate::ws::{GameGateway, RoomHub};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<MatchEngine>,
    pub ticker: Arc<MatchTicker>,
    pub ready: Arc<ReadyCoordinator>,
    pub grace: Arc<ReconnectGrace>,
    pub rooms: Arc<RoomHub>,
    pub gateway: Arc<GameGateway>,
    pub bus: EventBus,
    pub consumer: Arc<EventConsumer>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let (store, users): (Arc<dyn MatchRepository>, Arc<dyn UserDirectory>) =
            match &config.supabase {
                Some(supabase) => {
                    let client = SupabaseClient::new(supabase);
                    (
                        Arc::new(SupabaseMatchStore::new(client.clone())),
                        Arc::new(SupabaseUserDirectory::new(client)),
                    )
                }
                None => {
                    warn!("SUPABASE_URL not set, matches are kept in memory only");
                    (
                        Arc::new(InMemoryMatchStore::new()),
                        Arc::new(InMemoryUserDirectory::new()),
                    )
                }
            };
        Self::with_ports(config, store, users)
    }

    /// Wire the application around explicit persistence and user-lookup ports
    pub fn with_ports(
        config: Config,
        store: Arc<dyn MatchRepository>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let config = Arc::new(config);
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler);
        let bus = EventBus::new();
        let rooms = Arc::new(RoomHub::new());

        let engine = Arc::new(MatchEngine::new(
            store.clone(),
            Arc::new(bus.clone()),
            users,
            rooms.clone(),
            config.engine_settings(),
        ));
        let ticker = Arc::new(MatchTicker::new(
            engine.clone(),
            scheduler.clone(),
            config.tick_interval,
        ));
        let ready = Arc::new(ReadyCoordinator::new(
            engine.clone(),
            ticker.clone(),
            scheduler.clone(),
            Arc::new(bus.clone()),
            config.ready_timeout,
        ));
        let grace = Arc::new(ReconnectGrace::new(
            engine.clone(),
            scheduler,
            rooms.clone(),
            config.reconnect_grace,
        ));
        let gateway = Arc::new(GameGateway::new(
            engine.clone(),
            ticker.clone(),
            ready.clone(),
            grace.clone(),
            rooms.clone(),
        ));
        let consumer = Arc::new(EventConsumer::new(
            engine.clone(),
            store,
            Arc::new(bus.clone()),
            ready.clone(),
            ticker.clone(),
            rooms.clone(),
        ));

        Self {
            config,
            engine,
            ticker,
            ready,
            grace,
            rooms,
            gateway,
            bus,
            consumer,
        }
    }

    /// Start consuming integration events from the bus
    pub fn spawn_event_consumer(&self) -> JoinHandle<()> {
        let rx = self.bus.subscribe();
        tokio::spawn(self.consumer.clone().run(rx))
    }

    /// Stop all timers and save every cached match
    pub async fn shutdown(&self) {
        self.ticker.stop_all();
        self.ready.cancel_all();
        self.grace.cancel_all();
        self.engine.flush_all().await;
        info!("Match engine drained");
    }
}
