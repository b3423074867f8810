use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use futures::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use pong_match_server::game::{Match, MatchConfig, MatchMode};
use pong_match_server::store::{InMemoryMatchStore, InMemoryUserDirectory, MatchRecord};
use pong_match_server::{build_router, AppState, Config};

const SECRET: &str = "integration-secret";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spin up a server on a random port with one seeded lobby.
/// Returns the base URL, the match id and its two players.
async fn start_server() -> (String, Uuid, Uuid, Uuid) {
    let store = Arc::new(InMemoryMatchStore::new());
    let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
    let game = Match::new(
        Uuid::new_v4(),
        MatchMode::Classic,
        None,
        MatchConfig::default(),
        &[p1, p2],
    )
    .unwrap();
    store.seed(MatchRecord::from_match(&game).unwrap());

    let state = AppState::with_ports(
        Config::for_local(SECRET),
        store,
        Arc::new(InMemoryUserDirectory::new()),
    );
    let app = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{}", port), game.id(), p1, p2)
}

fn token_for(user_id: Uuid) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": user_id, "exp": 4_102_444_800u64 }).to_string());
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(format!("{}.{}", header, payload).as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{}.{}.{}", header, payload, signature)
}

async fn ws_connect(base: &str, user_id: Uuid) -> Socket {
    let url = format!("{}/ws?token={}", base.replace("http://", "ws://"), token_for(user_id));
    let (stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    stream
}

async fn ws_send(socket: &mut Socket, event: &str, data: serde_json::Value) {
    let frame = json!({ "event": event, "data": data });
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Receive frames until one with the expected event name (and matching
/// `pred`) arrives.
async fn ws_recv_event(
    socket: &mut Socket,
    event: &str,
    pred: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = tokio::time::timeout(remaining, socket.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {}", event))
            .unwrap()
            .unwrap();

        if let Message::Text(text) = msg {
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            if parsed["event"].as_str() == Some(event) && pred(&parsed["data"]) {
                return parsed["data"].clone();
            }
        }
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let (base, _, _, _) = start_server().await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["running_tickers"], 0);
}

#[tokio::test]
async fn bad_token_is_refused() {
    let (base, _, _, _) = start_server().await;
    let url = format!("{}/ws?token=not.a.token", base.replace("http://", "ws://"));
    assert!(tokio_tungstenite::connect_async(&url).await.is_err());
}

#[tokio::test]
async fn two_players_ready_up_and_receive_live_frames() {
    let (base, game_id, p1, p2) = start_server().await;
    let mut left = ws_connect(&base, p1).await;
    let mut right = ws_connect(&base, p2).await;

    for socket in [&mut left, &mut right] {
        ws_send(socket, "join_game", json!({ "gameId": game_id })).await;
        let state = ws_recv_event(socket, "game_state", |_| true).await;
        assert_eq!(state["status"], "WAITING");
        assert_eq!(state["paddles"]["left"]["y"], 250.0);
    }

    ws_send(&mut left, "ready", json!({ "gameId": game_id })).await;
    ws_send(&mut right, "ready", json!({ "gameId": game_id })).await;

    let started = ws_recv_event(&mut left, "game_state", |d| d["status"] == "IN_PROGRESS").await;
    assert_eq!(started["gameId"], json!(game_id));
    let ball = ws_recv_event(&mut right, "ball_state", |_| true).await;
    assert_eq!(ball["status"], "IN_PROGRESS");
    assert!(ball["ball"]["vx"].as_f64().unwrap().abs() > 0.0);

    ws_send(
        &mut right,
        "paddle_move",
        json!({ "gameId": game_id, "direction": "up", "deltaTime": 99.0 }),
    )
    .await;
    let update = ws_recv_event(&mut left, "paddle_update", |_| true).await;
    assert_eq!(update["playerId"], json!(p2));
    assert_eq!(update["side"], "right");
    assert_eq!(update["y"], 242.0);

    let probe: serde_json::Value = reqwest::get(format!("{}/matches/{}/state", base, game_id))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(probe["status"], "IN_PROGRESS");
}

#[tokio::test]
async fn outsider_gets_an_error_frame() {
    let (base, game_id, _, _) = start_server().await;
    let mut outsider = ws_connect(&base, Uuid::new_v4()).await;

    ws_send(&mut outsider, "join_game", json!({ "gameId": game_id })).await;
    let error = ws_recv_event(&mut outsider, "error", |_| true).await;
    assert!(error["message"].as_str().unwrap().contains("not a participant"));

    ws_send(&mut outsider, "paddle_set", json!({ "gameId": game_id, "y": 1.0 })).await;
    let error = ws_recv_event(&mut outsider, "error", |_| true).await;
    assert!(error["message"].as_str().unwrap().contains("Join match"));
}
