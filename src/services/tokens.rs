//! tokens.rs
//!
//! Проверка логин-токенов и выпуск booking-токенов (JWT, HS256).
//!
//! Логин-токены выдает внешний сервис аутентификации — здесь они только
//! проверяются по общему секрету. Booking-токен выдается после
//! промоушена в очереди, живет недолго и жестко привязан к паре
//! (пользователь, событие). Сам по себе токен ничего не бронирует —
//! это пропуск к синхронной попытке захвата мест.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("токен не прошел проверку: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("токен выдан для другого события")]
    WrongEvent,
}

// Claims логин-токена внешнего auth-сервиса. Нам важен только sub.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginClaims {
    pub sub: String,
    pub exp: usize,
}

// Claims booking-токена: привязка к событию — часть подписи.
#[derive(Debug, Serialize, Deserialize)]
pub struct BookingClaims {
    pub sub: String,
    pub event_id: String,
    pub iat: usize,
    pub exp: usize,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    booking_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, booking_ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            booking_ttl: Duration::seconds(booking_ttl_secs),
        }
    }

    pub fn booking_ttl_secs(&self) -> i64 {
        self.booking_ttl.num_seconds()
    }

    /// Проверяет логин-токен и возвращает id пользователя.
    pub fn verify_login(&self, token: &str) -> Result<String, TokenError> {
        let data = decode::<LoginClaims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims.sub)
    }

    /// Выпускает booking-токен для промоутнутого пользователя.
    pub fn issue_booking(
        &self,
        user_id: &str,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = BookingClaims {
            sub: user_id.to_string(),
            event_id: event_id.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + self.booking_ttl).timestamp() as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Проверяет booking-токен и его привязку к событию; возвращает id
    /// пользователя из sub.
    pub fn verify_booking(&self, token: &str, event_id: &str) -> Result<String, TokenError> {
        let data = decode::<BookingClaims>(token, &self.decoding, &Validation::default())?;
        if data.claims.event_id != event_id {
            return Err(TokenError::WrongEvent);
        }
        Ok(data.claims.sub)
    }
}
