//! queue.rs
//!
//! Транспорт очереди ожидания (WebSocket) и выдача booking-токенов.
//!
//! Клиент держит одно WS-соединение на пару (событие, пользователь) и
//! получает кадры позиций по мере продвижения. Единственный сигнал о
//! допуске — явный кадр {"status":"PROMOTED"}; позиция никогда не
//! опускается до нуля и сигналом не является. После промоушена клиент
//! забирает booking-токен обычным HTTP-запросом с логин-токеном.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::QueueFrame;
use crate::services::queue::JoinError;
use crate::AppState;

pub fn ws_routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws/queue", get(queue_ws))
}

pub fn token_routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/v1/auth/queue-token",
        get(issue_queue_token).post(issue_queue_token),
    )
}

/* ---------- WEBSOCKET ---------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueParams {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

// GET /ws/queue?eventId=...&userId=...
async fn queue_ws(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueueParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_queue_socket(socket, state, params))
}

async fn handle_queue_socket(mut socket: WebSocket, state: Arc<AppState>, params: QueueParams) {
    let (event_id, user_id) = match (params.event_id, params.user_id) {
        (Some(event_id), Some(user_id))
            if !event_id.trim().is_empty() && !user_id.trim().is_empty() =>
        {
            (event_id, user_id)
        }
        _ => {
            send_error(&mut socket, "eventId и userId обязательны").await;
            return;
        }
    };

    let mut frames = match state.queue.join(&event_id, &user_id, Utc::now()) {
        Ok(frames) => frames,
        Err(JoinError::UnknownEvent) => {
            send_error(&mut socket, "Событие не найдено").await;
            return;
        }
    };

    debug!("Queue connection opened: user {} event {}", user_id, event_id);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    let text = frame_json(&frame, &user_id).to_string();
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // Очередь закрыла канал: промоушен разменян, запись
                // истекла или состояние сбросили.
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Входящие кадры клиента транспорту не нужны.
                Some(Ok(_)) => {}
            },
        }
    }

    // Рвем только это соединение; запись в очереди переживет обрыв
    // в пределах льготного окна. Приемник отпускаем до disconnect,
    // иначе очередь примет этот teardown за чужой.
    drop(frames);
    state.queue.disconnect(&event_id, &user_id, Utc::now());
    debug!("Queue connection closed: user {} event {}", user_id, event_id);
}

async fn send_error(socket: &mut WebSocket, message: &str) {
    let frame = json!({ "error": message }).to_string();
    let _ = socket.send(Message::Text(frame.into())).await;
    let _ = socket.close().await;
}

fn frame_json(frame: &QueueFrame, user_id: &str) -> serde_json::Value {
    match frame {
        QueueFrame::Position(position) => json!({ "position": position, "userId": user_id }),
        QueueFrame::Promoted => json!({ "status": "PROMOTED", "userId": user_id }),
    }
}


/* ---------- BOOKING TOKEN ---------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenParams {
    event_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    booking_token: String,
}

// GET|POST /api/v1/auth/queue-token?eventId=...
//
// Только для промоутнутых: остальным — 403, без утечки позиции.
async fn issue_queue_token(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<TokenParams>,
) -> ApiResult<Json<TokenResponse>> {
    if !state.seats.event_exists(&params.event_id) {
        return Err(ApiError::not_found("Событие не найдено"));
    }
    if !state.queue.mark_token_issued(&params.event_id, &user.user_id) {
        return Err(ApiError::NotPromoted(
            "Вы еще не допущены к бронированию: дождитесь своей очереди".to_string(),
        ));
    }

    let token = state
        .tokens
        .issue_booking(&user.user_id, &params.event_id, Utc::now())
        .map_err(|e| ApiError::Internal(anyhow::Error::new(e)))?;

    info!(
        "Booking token issued: user {} event {}",
        user.user_id, params.event_id
    );
    Ok(Json(TokenResponse {
        booking_token: token,
    }))
}
