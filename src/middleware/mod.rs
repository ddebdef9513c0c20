use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use std::sync::Arc;

use crate::error::ApiError;

// Достает bearer-токен из заголовка Authorization.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

// Аутентифицированный пользователь по логин-токену внешнего
// auth-сервиса. Сами логин-токены здесь не выдаются.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

// Bearer JWT extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(&parts.headers).ok_or_else(|| {
            ApiError::Unauthorized("Требуется заголовок Authorization: Bearer".to_string())
        })?;

        let user_id = state
            .tokens
            .verify_login(token)
            .map_err(|_| ApiError::Unauthorized("Неверный или истекший токен".to_string()))?;

        Ok(AuthUser { user_id })
    }
}
