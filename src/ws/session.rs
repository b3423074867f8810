//! Routes client intents from a socket into the engine and lobby

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{EngineError, MatchBroadcaster, MatchEngine, MatchTicker};
use crate::game::{Direction, MatchError, MatchStatus, SERVER_TICK_DT};
use crate::lobby::{ReadyCoordinator, ReconnectGrace};

use super::protocol::{ClientMsg, PaddleUpdate, ServerMsg};
use super::rooms::{Departure, RoomHub};

/// One authenticated socket
#[derive(Clone)]
pub struct Connection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub outbox: mpsc::Sender<ServerMsg>,
}

impl Connection {
    pub fn new(user_id: Uuid, outbox: mpsc::Sender<ServerMsg>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            outbox,
        }
    }

    /// Queue a frame for this socket only
    pub async fn send(&self, msg: ServerMsg) {
        if self.outbox.send(msg).await.is_err() {
            debug!(user_id = %self.user_id, "Outbox closed, dropping frame");
        }
    }
}

/// Errors reported back to the client as `error` frames
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("You are not a participant of match {0}")]
    NotParticipant(Uuid),

    #[error("Join match {0} before sending input")]
    NotJoined(Uuid),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub struct GameGateway {
    engine: Arc<MatchEngine>,
    ticker: Arc<MatchTicker>,
    ready: Arc<ReadyCoordinator>,
    grace: Arc<ReconnectGrace>,
    rooms: Arc<RoomHub>,
}

impl GameGateway {
    pub fn new(
        engine: Arc<MatchEngine>,
        ticker: Arc<MatchTicker>,
        ready: Arc<ReadyCoordinator>,
        grace: Arc<ReconnectGrace>,
        rooms: Arc<RoomHub>,
    ) -> Self {
        Self {
            engine,
            ticker,
            ready,
            grace,
            rooms,
        }
    }

    pub async fn handle(&self, conn: &Connection, msg: ClientMsg) -> Result<(), SessionError> {
        match msg {
            ClientMsg::JoinGame(r) => self.join_game(conn, r.game_id).await,
            ClientMsg::Ready(r) => {
                self.require_joined(conn, r.game_id)?;
                self.ready.ready_up(r.game_id, conn.user_id).await?;
                Ok(())
            }
            ClientMsg::PaddleMove(m) => {
                self.require_joined(conn, m.game_id)?;
                self.move_paddle(conn, m.game_id, PaddleInput::Step(m.direction))
                    .await
            }
            ClientMsg::PaddleSet(s) => {
                self.require_joined(conn, s.game_id)?;
                self.move_paddle(conn, s.game_id, PaddleInput::Absolute(s.y))
                    .await
            }
        }
    }

    /// Subscribe to a match room. Also the reconnection path.
    async fn join_game(&self, conn: &Connection, match_id: Uuid) -> Result<(), SessionError> {
        let seated = self.grace.on_reconnect(match_id, conn.user_id).await?;
        if !seated {
            return Err(SessionError::NotParticipant(match_id));
        }

        if let Some(departure) =
            self.rooms
                .join(conn.id, conn.user_id, match_id, conn.outbox.clone())
        {
            self.on_departure(departure).await;
        }

        let game = self.engine.inspect(match_id).await?;
        conn.send(ServerMsg::game_state(&game)).await;

        match game.status() {
            MatchStatus::InProgress => self.ticker.start(match_id),
            MatchStatus::Waiting if game.players().len() == 2 => {
                self.ready.schedule_ready_timeout(match_id)
            }
            _ => {}
        }
        info!(match_id = %match_id, user_id = %conn.user_id, status = ?game.status(), "Player joined match");
        Ok(())
    }

    async fn move_paddle(
        &self,
        conn: &Connection,
        match_id: Uuid,
        input: PaddleInput,
    ) -> Result<(), SessionError> {
        let player_id = conn.user_id;
        let (side, y) = self
            .engine
            .apply_external_update(match_id, |game| {
                if game.status().is_terminal() {
                    return Err(MatchError::InvalidState(format!(
                        "match is already {:?}",
                        game.status()
                    )));
                }
                let side = game
                    .player_side(player_id)
                    .ok_or(MatchError::PlayerNotFound(player_id))?;
                let y = match input {
                    PaddleInput::Step(direction) => {
                        game.move_paddle(player_id, direction, SERVER_TICK_DT)?
                    }
                    PaddleInput::Absolute(y) => game.set_paddle_position(player_id, y)?,
                };
                Ok((side, y))
            })
            .await?;

        self.rooms.broadcast(
            match_id,
            ServerMsg::PaddleUpdate(PaddleUpdate {
                game_id: match_id,
                player_id,
                side,
                y,
            }),
        );
        Ok(())
    }

    /// Socket closed
    pub async fn disconnect(&self, conn: &Connection) {
        if let Some(departure) = self.rooms.leave(conn.id) {
            self.on_departure(departure).await;
        }
    }

    async fn on_departure(&self, departure: Departure) {
        let Departure {
            user_id,
            match_id,
            user_still_present,
            room_empty,
        } = departure;

        if room_empty {
            self.ticker.stop(match_id);
        }
        if user_still_present {
            return;
        }
        if let Err(e) = self.grace.on_disconnect(match_id, user_id).await {
            warn!(match_id = %match_id, user_id = %user_id, error = %e, "Disconnect handling failed");
        }
    }

    fn require_joined(&self, conn: &Connection, match_id: Uuid) -> Result<(), SessionError> {
        if self.rooms.match_of(conn.id) == Some(match_id) {
            Ok(())
        } else {
            Err(SessionError::NotJoined(match_id))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PaddleInput {
    Step(Direction),
    Absolute(f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::engine::TokioScheduler;
    use crate::game::{MatchConfig, Side, PADDLE_HEIGHT};
    use crate::testing::Harness;
    use crate::ws::protocol::{GameRef, PaddleMove, PaddleSet};

    struct Fixture {
        harness: Harness,
        gateway: GameGateway,
        ticker: Arc<MatchTicker>,
        rooms: Arc<RoomHub>,
    }

    fn fixture() -> Fixture {
        let harness = Harness::new();
        let scheduler = Arc::new(TokioScheduler);
        let rooms = Arc::new(RoomHub::new());
        let ticker = Arc::new(MatchTicker::new(
            harness.engine.clone(),
            scheduler.clone(),
            Duration::from_millis(16),
        ));
        let ready = Arc::new(ReadyCoordinator::new(
            harness.engine.clone(),
            ticker.clone(),
            scheduler.clone(),
            Arc::new(harness.bus.clone()),
            Duration::from_secs(120),
        ));
        let grace = Arc::new(ReconnectGrace::new(
            harness.engine.clone(),
            scheduler,
            rooms.clone(),
            Duration::from_secs(30),
        ));
        let gateway = GameGateway::new(
            harness.engine.clone(),
            ticker.clone(),
            ready,
            grace,
            rooms.clone(),
        );
        Fixture {
            harness,
            gateway,
            ticker,
            rooms,
        }
    }

    fn connect(user_id: Uuid) -> (Connection, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(256);
        (Connection::new(user_id, tx), rx)
    }

    fn join(game_id: Uuid) -> ClientMsg {
        ClientMsg::JoinGame(GameRef { game_id })
    }

    #[tokio::test(start_paused = true)]
    async fn join_sends_current_state_and_rejects_strangers() {
        let f = fixture();
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let game = f.harness.seed(&[p1, p2]);

        let (conn, mut rx) = connect(p1);
        f.gateway.handle(&conn, join(game.id())).await.unwrap();
        match rx.recv().await.unwrap() {
            ServerMsg::GameState(frame) => {
                assert_eq!(frame.game_id, game.id());
                assert_eq!(frame.status, MatchStatus::Waiting);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert_eq!(f.rooms.match_of(conn.id), Some(game.id()));

        let (stranger, _rx) = connect(Uuid::new_v4());
        let err = f.gateway.handle(&stranger, join(game.id())).await.unwrap_err();
        assert!(matches!(err, SessionError::NotParticipant(id) if id == game.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn input_before_join_is_rejected() {
        let f = fixture();
        let p1 = Uuid::new_v4();
        let game = f.harness.seed(&[p1, Uuid::new_v4()]);
        let (conn, _rx) = connect(p1);

        let err = f
            .gateway
            .handle(&conn, ClientMsg::Ready(GameRef { game_id: game.id() }))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotJoined(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn paddle_input_uses_server_tick_and_is_broadcast() {
        let f = fixture();
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let game = f.harness.seed_started(MatchConfig::default(), [p1, p2]);
        let (conn, mut rx) = connect(p2);
        f.gateway.handle(&conn, join(game.id())).await.unwrap();
        f.ticker.stop_all();
        let _initial = rx.recv().await.unwrap();

        f.gateway
            .handle(
                &conn,
                ClientMsg::PaddleMove(PaddleMove {
                    game_id: game.id(),
                    direction: crate::game::Direction::Down,
                    delta_time: Some(1000.0),
                }),
            )
            .await
            .unwrap();
        let update = loop {
            if let ServerMsg::PaddleUpdate(u) = rx.recv().await.unwrap() {
                break u;
            }
        };
        assert_eq!(update.player_id, p2);
        assert_eq!(update.side, Side::Right);
        assert_eq!(update.y, 250.0 + 8.0);

        f.gateway
            .handle(
                &conn,
                ClientMsg::PaddleSet(PaddleSet {
                    game_id: game.id(),
                    y: 10_000.0,
                }),
            )
            .await
            .unwrap();
        let current = f.harness.engine.inspect(game.id()).await.unwrap();
        assert_eq!(current.player(p2).unwrap().paddle.y, 600.0 - PADDLE_HEIGHT);
    }

    #[tokio::test(start_paused = true)]
    async fn both_players_ready_over_sockets_starts_ticking() {
        let f = fixture();
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let game = f.harness.seed(&[p1, p2]);
        let (c1, _rx1) = connect(p1);
        let (c2, _rx2) = connect(p2);

        for conn in [&c1, &c2] {
            f.gateway.handle(conn, join(game.id())).await.unwrap();
            f.gateway
                .handle(conn, ClientMsg::Ready(GameRef { game_id: game.id() }))
                .await
                .unwrap();
        }
        assert!(f.ticker.is_running(game.id()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let current = f.harness.engine.inspect(game.id()).await.unwrap();
        assert_ne!(current.ball().x, 400.0);

        f.gateway.disconnect(&c1).await;
        assert!(f.ticker.is_running(game.id()));
        f.gateway.disconnect(&c2).await;
        assert!(!f.ticker.is_running(game.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn lobby_disconnect_drops_player_after_grace() {
        let f = fixture();
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let game = f.harness.seed(&[p1, p2]);
        let (c1, _rx1) = connect(p1);
        f.gateway.handle(&c1, join(game.id())).await.unwrap();

        f.gateway.disconnect(&c1).await;
        tokio::time::sleep(Duration::from_secs(31)).await;

        let (again, _rx) = connect(p1);
        let err = f.gateway.handle(&again, join(game.id())).await.unwrap_err();
        assert!(matches!(err, SessionError::NotParticipant(_)));
        assert_eq!(f.harness.store.get(game.id()).unwrap().player_ids, vec![p2]);
    }
}
