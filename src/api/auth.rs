//! Bearer-token authentication.
//!
//! HS256 tokens carrying `{ sub, tenant, role }`. Token issuance lives with
//! the identity system; the engine only verifies and resolves the caller.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::core_types::{Caller, Role, UserId};

use super::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Caller user id.
    pub sub: UserId,
    pub tenant: String,
    pub role: String,
    pub exp: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or malformed authorization header")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("unknown role: {0}")]
    UnknownRole(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": "UNAUTHENTICATED",
            "msg": self.to_string(),
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

pub struct AuthKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl AuthKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a token. Used by tooling and tests; production tokens come from
    /// the identity system sharing the secret.
    pub fn issue(
        &self,
        user_id: UserId,
        tenant: &str,
        role: Role,
        ttl_secs: u64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: user_id,
            tenant: tenant.to_string(),
            role: role.as_str().to_string(),
            exp: (chrono::Utc::now().timestamp() as u64) + ttl_secs,
        };
        encode(&Header::default(), &claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Result<Caller, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let role: Role = data
            .claims
            .role
            .parse()
            .map_err(|_| AuthError::UnknownRole(data.claims.role.clone()))?;
        Ok(Caller {
            user_id: data.claims.sub,
            tenant_id: data.claims.tenant,
            role,
        })
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<AppState>::from_ref(state);
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingToken)?;
        state.auth.verify(token)
    }
}
