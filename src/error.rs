//! error.rs
//!
//! Таксономия ошибок API. Конфликт мест, истекшая бронь и отсутствие
//! промоушена — ожидаемые исходы под нагрузкой: они возвращаются как
//! полноценные ответы с машинным кодом и никогда не превращаются в 5xx.
//! В 5xx попадают только настоящие внутренние сбои.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    // Запрос booking-токена без промоушена в активную очередь.
    #[error("{0}")]
    NotPromoted(String),

    #[error("{0}")]
    NotFound(String),

    // Место занято / бронь уже открыта. Клиент различает по коду.
    #[error("{message}")]
    Conflict {
        code: &'static str,
        message: String,
        conflicts: Vec<String>,
    },

    // TTL брони истек: клиент начинает заново с выбора мест.
    #[error("{0}")]
    Expired(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn seat_conflict(message: impl Into<String>, conflicts: Vec<String>) -> Self {
        ApiError::Conflict {
            code: "SEAT_CONFLICT",
            message: message.into(),
            conflicts,
        }
    }

    pub fn already_pending(message: impl Into<String>) -> Self {
        ApiError::Conflict {
            code: "ALREADY_PENDING",
            message: message.into(),
            conflicts: Vec::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, conflicts) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            ApiError::NotPromoted(msg) => (StatusCode::FORBIDDEN, "NOT_PROMOTED", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::Conflict {
                code,
                message,
                conflicts,
            } => (StatusCode::CONFLICT, code, message, Some(conflicts)),
            ApiError::Expired(msg) => (StatusCode::GONE, "RESERVATION_EXPIRED", msg, None),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "Внутренняя ошибка сервера".to_string(),
                    None,
                )
            }
        };

        let mut body = json!({
            "code": code,
            "message": message,
        });
        if let Some(conflicts) = conflicts {
            if !conflicts.is_empty() {
                body["conflicts"] = json!(conflicts);
            }
        }

        (status, Json(body)).into_response()
    }
}
