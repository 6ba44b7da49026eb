use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, StatusCode},
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing;

use crate::server::ApiState;

/// JWT claims handed to us by the external identity service.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub recipient_id: String,
    pub exp: usize,
}

/// Verified recipient identity, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub recipient_id: String,
}

fn extract_token(auth_header: Option<&str>) -> Option<String> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
}

/// Mints a token. Session issuance belongs to the external identity
/// collaborator; this exists for operational tooling and tests that need a
/// token signed with the shared secret.
pub fn generate_token(
    recipient_id: &str,
    secret: &str,
    expires_in_secs: u64,
) -> Result<String, StatusCode> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .as_secs() as usize;

    let claims = Claims {
        recipient_id: recipient_id.to_string(),
        exp: now + expires_in_secs as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| {
        tracing::error!("failed to generate JWT token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Verifies a token and extracts the recipient identity.
pub fn verify_token(token: &str, secret: &str) -> Result<String, StatusCode> {
    let decoding_key = DecodingKey::from_secret(secret.as_ref());
    let validation = Validation::default();

    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(token_data) => Ok(token_data.claims.recipient_id),
        Err(e) => {
            tracing::debug!("JWT verification failed: {}", e);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Axum middleware for bearer-token authentication. The WebSocket endpoint
/// authenticates inside its own handshake instead.
pub async fn auth_middleware(
    mut req: Request,
    next: axum::middleware::Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();
    if path == "/health" || path.starts_with("/ws") {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match extract_token(auth_header) {
        Some(t) => t,
        None => {
            tracing::debug!("missing Authorization header");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let state = req
        .extensions()
        .get::<ApiState>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let recipient_id = verify_token(&token, &state.ctx.config.server.jwt_secret)?;

    req.extensions_mut().insert(AuthenticatedUser {
        recipient_id: recipient_id.clone(),
    });

    tracing::debug!(recipient_id = %recipient_id, "request authenticated");

    Ok(next.run(req).await)
}
