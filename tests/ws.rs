//! Queue transport integration tests: real WebSocket connections
//! against an ephemeral server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use ticket_gate::config::{
    AppConfig, Config, FeatureFlags, JwtConfig, QueueConfig, ReservationConfig, SeedConfig,
    SweeperConfig,
};
use ticket_gate::controllers;
use ticket_gate::seed::SeedCatalog;
use ticket_gate::AppState;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> Config {
    Config {
        app: AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            rust_log: "error".to_string(),
        },
        queue: QueueConfig {
            default_capacity: 1,
            promotion_grace_secs: 330,
            disconnect_grace_secs: 30,
            enforce_admission: true,
        },
        reservation: ReservationConfig {
            ttl_secs: 300,
            max_seats_per_request: 10,
            retention_secs: 3600,
        },
        jwt: JwtConfig {
            secret: "ws-secret".to_string(),
            booking_ttl_secs: 300,
        },
        sweeper: SweeperConfig { interval_secs: 1 },
        seed: SeedConfig {
            file: "unused.json".to_string(),
        },
        features: FeatureFlags {
            enable_analytics: false,
            enable_test_api: false,
        },
    }
}

fn test_catalog() -> SeedCatalog {
    serde_json::from_str(
        r#"{
            "events": [
                {
                    "id": "EVT001",
                    "title": "Main Arena",
                    "queueCapacity": 1,
                    "tiers": [
                        { "category": "VIP", "rows": ["A"], "seatsPerRow": 5, "price": 500.0 }
                    ]
                }
            ]
        }"#,
    )
    .unwrap()
}

async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(test_config(), test_catalog());
    let app = Router::new()
        .merge(controllers::queue::ws_routes())
        .nest("/api", controllers::routes(&state.config.features))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, query: &str) -> WsClient {
    let url = format!("ws://{}/ws/queue{}", addr, query);
    let (ws, _) = connect_async(url).await.expect("WS connect failed");
    ws
}

// Следующий текстовый кадр как JSON; пинги и прочий шум пропускаются.
async fn next_json(ws: &mut WsClient) -> Value {
    timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).expect("frame is not JSON")
                }
                Some(Ok(_)) => {}
                other => panic!("expected a text frame, got {:?}", other),
            }
        }
    })
    .await
    .expect("no frame within 5s")
}

// Ждет закрытия соединения со стороны сервера.
async fn wait_closed(ws: &mut WsClient) {
    timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("socket did not close within 5s");
}

#[tokio::test]
async fn handshake_without_params_gets_an_error_frame_then_close() {
    let (addr, _state) = spawn_server().await;

    let mut ws = connect(addr, "").await;
    let frame = next_json(&mut ws).await;
    assert!(frame["error"].as_str().is_some());
    wait_closed(&mut ws).await;

    // Пустые значения параметров равнозначны их отсутствию.
    let mut ws = connect(addr, "?eventId=EVT001&userId=").await;
    let frame = next_json(&mut ws).await;
    assert!(frame["error"].as_str().is_some());
    wait_closed(&mut ws).await;
}

#[tokio::test]
async fn handshake_for_unknown_event_gets_an_error_frame() {
    let (addr, _state) = spawn_server().await;
    let mut ws = connect(addr, "?eventId=NOPE&userId=u1").await;
    let frame = next_json(&mut ws).await;
    assert!(frame["error"].as_str().is_some());
    wait_closed(&mut ws).await;
}

#[tokio::test]
async fn wire_frames_match_the_client_contract() {
    let (addr, state) = spawn_server().await;

    // Емкость 1: первый подключившийся промоутится явным статусным
    // кадром, второй получает кадр позиции с эхом userId.
    let mut first = connect(addr, "?eventId=EVT001&userId=u-first").await;
    assert_eq!(
        next_json(&mut first).await,
        json!({ "status": "PROMOTED", "userId": "u-first" })
    );

    let mut second = connect(addr, "?eventId=EVT001&userId=u-second").await;
    assert_eq!(
        next_json(&mut second).await,
        json!({ "position": 1, "userId": "u-second" })
    );

    // Размен промоушена на бронь закрывает канал первого: очереди
    // больше нечего ему сказать.
    let reservation_id = Uuid::new_v4();
    state.queue.consume("EVT001", "u-first", reservation_id);
    wait_closed(&mut first).await;

    // Освободившийся слот доходит до второго тем же явным кадром.
    state.queue.release_session(reservation_id);
    assert_eq!(
        next_json(&mut second).await,
        json!({ "status": "PROMOTED", "userId": "u-second" })
    );
}
