//! API integration tests

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    routing::get,
    Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

use ticket_gate::config::{
    AppConfig, Config, FeatureFlags, JwtConfig, QueueConfig, ReservationConfig, SeedConfig,
    SweeperConfig,
};
use ticket_gate::controllers;
use ticket_gate::seed::SeedCatalog;
use ticket_gate::services::tokens::{BookingClaims, LoginClaims};
use ticket_gate::AppState;

const SECRET: &str = "integration-secret";

fn test_config() -> Config {
    Config {
        app: AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            rust_log: "error".to_string(),
        },
        queue: QueueConfig {
            default_capacity: 100,
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
            secret: SECRET.to_string(),
            booking_ttl_secs: 300,
        },
        sweeper: SweeperConfig { interval_secs: 1 },
        seed: SeedConfig {
            file: "unused.json".to_string(),
        },
        features: FeatureFlags {
            enable_analytics: true,
            enable_test_api: true,
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
                    "queueCapacity": 2,
                    "tiers": [
                        { "category": "VIP", "rows": ["A"], "seatsPerRow": 10, "price": 500.0 }
                    ]
                },
                {
                    "id": "EVT002",
                    "title": "Side Stage",
                    "tiers": [
                        { "category": "GA", "rows": ["B"], "seatsPerRow": 5, "price": 100.0 }
                    ]
                }
            ]
        }"#,
    )
    .unwrap()
}

fn build_app_with(config: Config) -> (Router, Arc<AppState>) {
    let state = AppState::new(config, test_catalog());
    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(controllers::queue::ws_routes())
        .nest("/api", controllers::routes(&state.config.features))
        .with_state(state.clone());
    (app, state)
}

fn build_app() -> (Router, Arc<AppState>) {
    build_app_with(test_config())
}

fn login_token(user_id: &str) -> String {
    let claims = LoginClaims {
        sub: user_id.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with_bearer(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_json_with_bearer(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn reserve_body(event_id: &str, seat_ids: &[&str]) -> Value {
    json!({
        "eventId": event_id,
        "seats": seat_ids.iter().map(|s| json!({ "seatId": s })).collect::<Vec<_>>(),
    })
}

#[tokio::test]
async fn health_endpoint_answers() -> Result<()> {
    let (app, _state) = build_app();
    let response = app.oneshot(get_request("/health")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn reserve_without_admission_is_sent_to_the_queue() -> Result<()> {
    let (app, _state) = build_app();

    let response = app
        .oneshot(post_json(
            "/api/bookings/reserve",
            reserve_body("EVT001", &["VIP-A1"]),
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await?;
    assert_eq!(body["code"], "QUEUED");
    Ok(())
}

#[tokio::test]
async fn full_booking_flow_through_the_queue() -> Result<()> {
    let (app, state) = build_app();
    let user = "flow-user";

    // Встаем в очередь; пустая очередь промоутит сразу.
    let _frames = state.queue.join("EVT001", user, Utc::now()).unwrap();

    // Обмениваем промоушен на booking-токен.
    let response = app
        .clone()
        .oneshot(get_with_bearer(
            "/api/v1/auth/queue-token?eventId=EVT001",
            &login_token(user),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    let booking_token = body["bookingToken"].as_str().unwrap().to_string();

    // Синхронный захват мест по токену.
    let response = app
        .clone()
        .oneshot(post_json_with_bearer(
            "/api/bookings/reserve",
            &booking_token,
            reserve_body("EVT001", &["VIP-A1", "VIP-A2"]),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await?;
    assert_eq!(body["expiresInSeconds"], 300);
    assert_eq!(body["totalAmount"], 1000.0);
    let reservation_id = body["reservationId"].as_str().unwrap().to_string();

    // Подтверждение в платежном окне.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/bookings/confirm",
            json!({
                "reservationId": reservation_id,
                "paymentMethod": "CREDIT_CARD",
                "paymentDetails": { "last4": "4242" },
            }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "PAID");
    assert!(body["transactionId"].as_str().is_some());

    // Заказ читается по id и несет терминальный статус.
    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/bookings/{}", reservation_id)))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "PAID");
    assert_eq!(body["seatIds"], json!(["VIP-A1", "VIP-A2"]));

    // Проданные места видны в листинге.
    let response = app
        .oneshot(get_request(
            "/api/bookings/seats?eventId=EVT001&status=SOLD",
        ))
        .await?;
    let body = body_json(response).await?;
    let sold: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(sold, vec!["VIP-A1", "VIP-A2"]);
    Ok(())
}

#[tokio::test]
async fn conflicting_reserve_names_the_contested_seats() -> Result<()> {
    let (app, state) = build_app();
    let now = Utc::now();
    let token_a = state.tokens.issue_booking("user-a", "EVT001", now).unwrap();
    let token_b = state.tokens.issue_booking("user-b", "EVT001", now).unwrap();

    let response = app
        .clone()
        .oneshot(post_json_with_bearer(
            "/api/bookings/reserve",
            &token_a,
            reserve_body("EVT001", &["VIP-A1"]),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Пересечение с уже захваченным местом валит весь запрос.
    let response = app
        .clone()
        .oneshot(post_json_with_bearer(
            "/api/bookings/reserve",
            &token_b,
            reserve_body("EVT001", &["VIP-A2", "VIP-A1"]),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await?;
    assert_eq!(body["code"], "SEAT_CONFLICT");
    assert_eq!(body["conflicts"], json!(["VIP-A1"]));

    // Второе место не зацепило: оно по-прежнему свободно.
    let response = app
        .oneshot(get_request(
            "/api/bookings/seats?eventId=EVT001&status=AVAILABLE",
        ))
        .await?;
    let body = body_json(response).await?;
    assert!(body
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s["id"] == "VIP-A2"));
    Ok(())
}

#[tokio::test]
async fn one_open_reservation_per_user_and_event() -> Result<()> {
    let (app, state) = build_app();
    let token = state
        .tokens
        .issue_booking("greedy", "EVT001", Utc::now())
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json_with_bearer(
            "/api/bookings/reserve",
            &token,
            reserve_body("EVT001", &["VIP-A3"]),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(post_json_with_bearer(
            "/api/bookings/reserve",
            &token,
            reserve_body("EVT001", &["VIP-A4"]),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await?;
    assert_eq!(body["code"], "ALREADY_PENDING");
    Ok(())
}

#[tokio::test]
async fn stale_or_foreign_booking_tokens_redirect_to_the_queue() -> Result<()> {
    let (app, state) = build_app();

    // Токен с истекшим exp (за пределами leeway валидатора).
    let stale = encode(
        &Header::default(),
        &BookingClaims {
            sub: "late-user".to_string(),
            event_id: "EVT001".to_string(),
            iat: (Utc::now() - Duration::hours(2)).timestamp() as usize,
            exp: (Utc::now() - Duration::hours(1)).timestamp() as usize,
        },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    let response = app
        .clone()
        .oneshot(post_json_with_bearer(
            "/api/bookings/reserve",
            &stale,
            reserve_body("EVT001", &["VIP-A1"]),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Токен другого события тоже не дает допуска.
    let foreign = state
        .tokens
        .issue_booking("cross-user", "EVT001", Utc::now())
        .unwrap();
    let response = app
        .oneshot(post_json_with_bearer(
            "/api/bookings/reserve",
            &foreign,
            reserve_body("EVT002", &["GA-B1"]),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await?;
    assert_eq!(body["code"], "QUEUED");
    Ok(())
}

#[tokio::test]
async fn expired_reservation_is_gone_not_missing() -> Result<()> {
    // Нулевое платежное окно: бронь истекает мгновенно.
    let mut config = test_config();
    config.reservation.ttl_secs = 0;
    let (app, state) = build_app_with(config);

    let token = state
        .tokens
        .issue_booking("slow-payer", "EVT001", Utc::now())
        .unwrap();
    let response = app
        .clone()
        .oneshot(post_json_with_bearer(
            "/api/bookings/reserve",
            &token,
            reserve_body("EVT001", &["VIP-A5"]),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let reservation_id = body_json(response).await?["reservationId"]
        .as_str()
        .unwrap()
        .to_string();

    let confirm = json!({
        "reservationId": reservation_id,
        "paymentMethod": "CREDIT_CARD",
        "paymentDetails": {},
    });
    let response = app.clone().oneshot(post_json("/api/bookings/confirm", confirm.clone())).await?;
    assert_eq!(response.status(), StatusCode::GONE);
    let body = body_json(response).await?;
    assert_eq!(body["code"], "RESERVATION_EXPIRED");

    // Повторный confirm отличим от несуществующей брони.
    let response = app.clone().oneshot(post_json("/api/bookings/confirm", confirm)).await?;
    assert_eq!(response.status(), StatusCode::GONE);
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/bookings/confirm",
            json!({
                "reservationId": uuid::Uuid::new_v4(),
                "paymentMethod": "CREDIT_CARD",
                "paymentDetails": {},
            }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Места вернулись в продажу.
    let response = app
        .oneshot(get_request(
            "/api/bookings/seats?eventId=EVT001&status=RESERVED",
        ))
        .await?;
    let body = body_json(response).await?;
    assert_eq!(body.as_array().unwrap().len(), 0);
    Ok(())
}

#[tokio::test]
async fn cancel_is_idempotent_and_frees_the_seat() -> Result<()> {
    let (app, state) = build_app();
    let token = state
        .tokens
        .issue_booking("changed-mind", "EVT001", Utc::now())
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json_with_bearer(
            "/api/bookings/reserve",
            &token,
            reserve_body("EVT001", &["VIP-A6"]),
        ))
        .await?;
    let reservation_id = body_json(response).await?["reservationId"]
        .as_str()
        .unwrap()
        .to_string();

    let cancel = json!({ "reservationId": reservation_id });
    let response = app.clone().oneshot(post_json("/api/bookings/cancel", cancel.clone())).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?["status"], "CANCELLED");

    let response = app.clone().oneshot(post_json("/api/bookings/cancel", cancel)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?["status"], "CANCELLED");

    // Место можно штатно продать другому.
    let other = state
        .tokens
        .issue_booking("second-buyer", "EVT001", Utc::now())
        .unwrap();
    let response = app
        .oneshot(post_json_with_bearer(
            "/api/bookings/reserve",
            &other,
            reserve_body("EVT001", &["VIP-A6"]),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    Ok(())
}

#[tokio::test]
async fn queue_token_route_guards_login_and_promotion() -> Result<()> {
    let (app, state) = build_app();

    let response = app
        .clone()
        .oneshot(get_request("/api/v1/auth/queue-token?eventId=EVT001"))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(get_with_bearer(
            "/api/v1/auth/queue-token?eventId=EVT001",
            "not-a-jwt",
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Валидный логин, но пользователь не промоутнут.
    let response = app
        .clone()
        .oneshot(get_with_bearer(
            "/api/v1/auth/queue-token?eventId=EVT001",
            &login_token("bystander"),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await?;
    assert_eq!(body["code"], "NOT_PROMOTED");

    // Неизвестное событие.
    let _frames = state.queue.join("EVT001", "vip-user", Utc::now()).unwrap();
    let response = app
        .oneshot(get_with_bearer(
            "/api/v1/auth/queue-token?eventId=NOPE",
            &login_token("vip-user"),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn concurrent_surge_produces_exactly_one_winner() -> Result<()> {
    let (app, state) = build_app();
    let now = Utc::now();

    let attempts = (0..10).map(|i| {
        let app = app.clone();
        let token = state
            .tokens
            .issue_booking(&format!("racer-{}", i), "EVT001", now)
            .unwrap();
        async move {
            let response = app
                .oneshot(post_json_with_bearer(
                    "/api/bookings/reserve",
                    &token,
                    reserve_body("EVT001", &["VIP-A9"]),
                ))
                .await
                .unwrap();
            response.status()
        }
    });
    let statuses = futures::future::join_all(attempts).await;

    let created = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
    let conflicts = statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, 9);
    Ok(())
}

#[tokio::test]
async fn analytics_reports_seats_and_queue_depth() -> Result<()> {
    let (app, state) = build_app();
    let _frames = state.queue.join("EVT002", "watcher", Utc::now()).unwrap();

    let response = app
        .clone()
        .oneshot(get_request("/api/analytics?id=EVT002"))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["title"], "Side Stage");
    assert_eq!(body["seats"]["totalSeats"], 5);
    assert_eq!(body["seats"]["available"], 5);
    assert_eq!(body["queue"]["promoted"], 1);

    let response = app.oneshot(get_request("/api/analytics?id=NOPE")).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn reset_restores_the_seeded_state() -> Result<()> {
    let (app, state) = build_app();
    let token = state
        .tokens
        .issue_booking("resetter", "EVT001", Utc::now())
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json_with_bearer(
            "/api/bookings/reserve",
            &token,
            reserve_body("EVT001", &["VIP-A7"]),
        ))
        .await?;
    let reservation_id = body_json(response).await?["reservationId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app.clone().oneshot(post_json("/api/reset", json!({}))).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["eventsReseeded"], 2);

    // Брони больше нет, все места снова свободны.
    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/bookings/{}", reservation_id)))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app
        .oneshot(get_request(
            "/api/bookings/seats?eventId=EVT001&status=AVAILABLE&pageSize=100",
        ))
        .await?;
    let body = body_json(response).await?;
    assert_eq!(body.as_array().unwrap().len(), 10);
    Ok(())
}

#[tokio::test]
async fn request_shape_is_validated() -> Result<()> {
    let (app, _state) = build_app();

    // Пустой набор мест.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/bookings/reserve",
            json!({ "eventId": "EVT001", "seats": [] }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Слишком много мест за один запрос.
    let too_many: Vec<&str> = (0..11).map(|_| "VIP-A1").collect();
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/bookings/reserve",
            reserve_body("EVT001", &too_many),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Неизвестное событие.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/bookings/reserve",
            reserve_body("NOPE", &["VIP-A1"]),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Мусорный фильтр статуса и нулевая страница.
    let response = app
        .clone()
        .oneshot(get_request("/api/bookings/seats?eventId=EVT001&status=BOGUS"))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = app
        .oneshot(get_request("/api/bookings/seats?eventId=EVT001&pageSize=0"))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn admission_gate_can_be_disabled_for_load_rigs() -> Result<()> {
    let mut config = test_config();
    config.queue.enforce_admission = false;
    let (app, _state) = build_app_with(config);

    // Без токена, но с userId в теле — прямой путь к замкам.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/bookings/reserve",
            json!({
                "eventId": "EVT001",
                "seats": [{ "seatId": "VIP-A1" }],
                "userId": "rig-user",
            }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Без userId запрос отклоняется, а не бронируется анонимно.
    let response = app
        .oneshot(post_json(
            "/api/bookings/reserve",
            reserve_body("EVT001", &["VIP-A2"]),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}
