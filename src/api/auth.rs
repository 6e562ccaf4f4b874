// =============================================================================
// Bearer Token Authentication
// =============================================================================
//
// Mutating endpoints require `Authorization: Bearer <token>` matching the
// `PULSE_ADMIN_TOKEN` environment variable.  The WebSocket feed passes the
// same token as `?token=`.  Tokens are compared in constant time.  With no
// token configured every authenticated request is refused.
// =============================================================================

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

pub const ADMIN_TOKEN_ENV: &str = "PULSE_ADMIN_TOKEN";

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn expected_token() -> Option<String> {
    std::env::var(ADMIN_TOKEN_ENV)
        .ok()
        .filter(|t| !t.is_empty())
}

/// Check `presented` against the configured admin token.
pub fn validate_token(presented: &str) -> bool {
    match expected_token() {
        Some(expected) => constant_time_eq(presented.as_bytes(), expected.as_bytes()),
        None => false,
    }
}

/// Extractor guarding authenticated handlers.
pub struct AuthBearer;

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if expected_token().is_none() {
            warn!("{ADMIN_TOKEN_ENV} is not set, rejecting authenticated request");
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "Server authentication not configured",
            });
        }

        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match token {
            Some(token) if validate_token(token) => Ok(AuthBearer),
            Some(_) => {
                warn!("invalid admin token presented");
                Err(AuthRejection {
                    status: StatusCode::FORBIDDEN,
                    message: "Invalid authorization token",
                })
            }
            None => Err(AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                message: "Missing or malformed authorization header",
            }),
        }
    }
}
