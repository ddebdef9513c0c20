use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{ReservationStatus, Seat, SeatStatus};
use crate::services::seats::{AcquireError, ConfirmError, ReleaseError, SeatFilter};
use crate::{middleware, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings/reserve", post(reserve))
        .route("/bookings/confirm", post(confirm))
        .route("/bookings/cancel", post(cancel))
        .route("/bookings/seats", get(get_seats))
        .route("/bookings/{reservation_id}", get(get_reservation))
}

/* ---------- RESERVE ---------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReserveRequest {
    event_id: String,
    seats: Vec<SeatSelection>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeatSelection {
    seat_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReserveResponse {
    reservation_id: Uuid,
    expires_in_seconds: i64,
    total_amount: f64,
    seats: Vec<String>,
}

// POST /api/bookings/reserve
//
// Синхронная попытка захвата всех мест разом. Право на попытку дает
// валидный booking-токен; без него клиент получает 202 и отправляется
// в очередь ожидания — запрос никогда не ставится в очередь неявно.
async fn reserve(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ReserveRequest>,
) -> ApiResult<Response> {
    if req.event_id.trim().is_empty() {
        return Err(ApiError::bad_request("eventId обязателен"));
    }
    if req.seats.is_empty() {
        return Err(ApiError::bad_request("нужно выбрать хотя бы одно место"));
    }
    let max_seats = state.config.reservation.max_seats_per_request;
    if req.seats.len() > max_seats {
        return Err(ApiError::bad_request(format!(
            "не больше {} мест за один запрос",
            max_seats
        )));
    }
    if req.seats.iter().any(|s| s.seat_id.trim().is_empty()) {
        return Err(ApiError::bad_request("seatId не может быть пустым"));
    }
    if !state.seats.event_exists(&req.event_id) {
        return Err(ApiError::not_found("Событие не найдено"));
    }

    let user_id = if state.config.queue.enforce_admission {
        let admitted = middleware::bearer(&headers)
            .and_then(|token| state.tokens.verify_booking(token, &req.event_id).ok());
        match admitted {
            Some(user_id) => user_id,
            None => {
                // Нет допуска — в зал ожидания. Это не ошибка, а ответ.
                let body = json!({
                    "code": "QUEUED",
                    "message": "Сначала пройдите очередь ожидания этого события",
                });
                return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
            }
        }
    } else {
        req.user_id
            .clone()
            .ok_or_else(|| ApiError::bad_request("userId обязателен при отключенной очереди"))?
    };

    let now = Utc::now();
    let seat_ids: Vec<String> = req.seats.iter().map(|s| s.seat_id.clone()).collect();
    match state.seats.acquire(&req.event_id, &user_id, &seat_ids, now) {
        Ok(reservation) => {
            // Промоушен разменивается на booking-сессию: слот очереди
            // теперь держит сама бронь.
            state.queue.consume(&req.event_id, &user_id, reservation.id);
            let body = ReserveResponse {
                reservation_id: reservation.id,
                expires_in_seconds: (reservation.expires_at - now).num_seconds(),
                total_amount: reservation.total_amount,
                seats: reservation.seat_ids,
            };
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
        Err(AcquireError::UnknownEvent) => Err(ApiError::not_found("Событие не найдено")),
        Err(AcquireError::Conflict(conflicts)) => Err(ApiError::seat_conflict(
            "Часть мест уже недоступна",
            conflicts,
        )),
        Err(AcquireError::AlreadyPending(_)) => Err(ApiError::already_pending(
            "У вас уже есть незавершенная бронь на это событие",
        )),
    }
}

/* ---------- CONFIRM ---------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest {
    reservation_id: Uuid,
    payment_method: String,
    #[serde(default)]
    payment_details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmResponse {
    order_id: Uuid,
    status: ReservationStatus,
    transaction_id: Uuid,
}

// POST /api/bookings/confirm
async fn confirm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmRequest>,
) -> ApiResult<Json<ConfirmResponse>> {
    if req.payment_method.trim().is_empty() {
        return Err(ApiError::bad_request("paymentMethod обязателен"));
    }
    // Детали платежа проверяем по форме, но не храним.
    if req.payment_details.is_none() {
        return Err(ApiError::bad_request("paymentDetails обязательны"));
    }

    match state
        .seats
        .confirm(req.reservation_id, &req.payment_method, Utc::now())
    {
        Ok(order) => {
            state.queue.release_session(order.id);
            let transaction_id = order
                .payment
                .as_ref()
                .map(|p| p.transaction_id)
                .ok_or_else(|| {
                    ApiError::Internal(anyhow::anyhow!("оплаченная бронь без платежной записи"))
                })?;
            Ok(Json(ConfirmResponse {
                order_id: order.id,
                status: order.status,
                transaction_id,
            }))
        }
        Err(ConfirmError::NotFound) => Err(ApiError::not_found("Бронь не найдена")),
        Err(ConfirmError::Expired) => {
            state.queue.release_session(req.reservation_id);
            Err(ApiError::Expired(
                "Время на оплату истекло, места возвращены в продажу".to_string(),
            ))
        }
    }
}

/* ---------- CANCEL ---------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest {
    reservation_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelResponse {
    reservation_id: Uuid,
    status: ReservationStatus,
}

// POST /api/bookings/cancel — идемпотентна, повторная отмена ничего
// не освобождает второй раз.
async fn cancel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<CancelResponse>> {
    match state.seats.release(req.reservation_id, Utc::now()) {
        Ok(reservation) => {
            state.queue.release_session(reservation.id);
            Ok(Json(CancelResponse {
                reservation_id: reservation.id,
                status: reservation.status,
            }))
        }
        Err(ReleaseError::NotFound) => Err(ApiError::not_found("Бронь не найдена")),
    }
}

/* ---------- READ ---------- */

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReservationView {
    id: Uuid,
    user_id: String,
    event_id: String,
    status: ReservationStatus,
    total_amount: f64,
    seat_ids: Vec<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_id: Option<Uuid>,
}

// GET /api/bookings/{reservation_id}
async fn get_reservation(
    State(state): State<Arc<AppState>>,
    Path(reservation_id): Path<Uuid>,
) -> ApiResult<Json<ReservationView>> {
    let reservation = state
        .seats
        .get_reservation(reservation_id)
        .ok_or_else(|| ApiError::not_found("Бронь не найдена"))?;

    Ok(Json(ReservationView {
        id: reservation.id,
        user_id: reservation.user_id,
        event_id: reservation.event_id,
        status: reservation.status,
        total_amount: reservation.total_amount,
        seat_ids: reservation.seat_ids,
        created_at: reservation.created_at,
        expires_at: reservation.expires_at,
        transaction_id: reservation.payment.map(|p| p.transaction_id),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeatsQuery {
    event_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    row: Option<String>,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeatView {
    id: String,
    row: String,
    number: i32,
    category: String,
    price: f64,
    status: SeatStatus,
}

impl From<Seat> for SeatView {
    fn from(seat: Seat) -> Self {
        Self {
            id: seat.id,
            row: seat.row,
            number: seat.number,
            category: seat.category,
            price: seat.price,
            status: seat.status,
        }
    }
}

// GET /api/bookings/seats?eventId=...
async fn get_seats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SeatsQuery>,
) -> ApiResult<Json<Vec<SeatView>>> {
    let status = match params.status.as_deref() {
        None => None,
        Some("AVAILABLE") => Some(SeatStatus::Available),
        Some("RESERVED") => Some(SeatStatus::Reserved),
        Some("SOLD") => Some(SeatStatus::Sold),
        Some("BLOCKED") => Some(SeatStatus::Blocked),
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "неизвестный статус места: {}",
                other
            )))
        }
    };

    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(20);
    if page < 1 {
        return Err(ApiError::bad_request("page должен быть >= 1"));
    }
    if !(1..=100).contains(&page_size) {
        return Err(ApiError::bad_request("pageSize должен быть от 1 до 100"));
    }

    let filter = SeatFilter {
        status,
        row: params.row.clone(),
        page,
        page_size,
    };
    let seats = state
        .seats
        .list_seats(&params.event_id, &filter)
        .ok_or_else(|| ApiError::not_found("Событие не найдено"))?;

    Ok(Json(seats.into_iter().map(SeatView::from).collect()))
}
