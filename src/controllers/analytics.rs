//! analytics.rs
//!
//! Модуль для получения аналитики и статистики по событиям.
//!
//! Включает в себя следующую функциональность:
//! - Подсчет статистики по местам (проданные, зарезервированные, свободные).
//! - Расчет выручки и числа броней по статусам.
//! - Глубина очереди ожидания: ожидающие, промоутнутые, активные сессии.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::services::{queue::QueueStats, seats::SeatStats};
use crate::AppState;

/// Определяет маршруты, связанные с аналитикой.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/analytics", get(get_event_analytics))
}

/// GET /api/analytics?id=...
///
/// Возвращает статистику указанного события: места по статусам,
/// выручку, брони и текущую глубину очереди допуска.
#[derive(Debug, Deserialize)]
struct AnalyticsQuery {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyticsResponse {
    pub event_id: String,
    pub title: String,
    pub seats: SeatStats,
    pub queue: QueueStats,
}

async fn get_event_analytics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnalyticsQuery>,
) -> ApiResult<Json<AnalyticsResponse>> {
    let seats = state
        .seats
        .stats(&params.id)
        .ok_or_else(|| ApiError::not_found("Событие не найдено"))?;
    let queue = state
        .queue
        .stats(&params.id)
        .ok_or_else(|| ApiError::not_found("Событие не найдено"))?;
    let title = state.seats.event_title(&params.id).unwrap_or_default();

    Ok(Json(AnalyticsResponse {
        event_id: params.id,
        title,
        seats,
        queue,
    }))
}
