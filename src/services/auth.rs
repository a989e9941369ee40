use std::collections::HashMap;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::Json;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::models::api::ErrorResponse;

/// JWT claims carried by a bearer token. Issuance happens in an external
/// identity service; this module only verifies.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Expiry, seconds since epoch.
    pub exp: usize,
}

/// Verify a bearer token against the shared HS256 secret.
///
/// Every entry point funnels through this one function — the header path
/// and the query-parameter path must never diverge in validation strength.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AuthError::InvalidToken)?;

    Ok(data.claims)
}

/// The authenticated caller.
///
/// The token is taken from the `Authorization: Bearer` header, or from a
/// `token` query parameter for same-tab navigation (downloads) where
/// headers cannot be set. Both go through [`verify_token`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned);

        let token = match header_token {
            Some(t) => Some(t),
            None => Query::<HashMap<String, String>>::from_request_parts(parts, state)
                .await
                .ok()
                .and_then(|Query(mut params)| params.remove("token")),
        };

        let Some(token) = token else {
            return Err(unauthorized("Missing bearer token"));
        };

        match verify_token(&token, &state.config.jwt_secret) {
            Ok(claims) => Ok(AuthUser {
                user_id: claims.sub,
            }),
            Err(_) => Err(unauthorized("Invalid or expired token")),
        }
    }
}

fn unauthorized(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new(message)))
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid or expired token")]
    InvalidToken,
}
