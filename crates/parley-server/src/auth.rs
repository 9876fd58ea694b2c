//! Caller identity.
//!
//! Parley does not authenticate end users itself: it sits behind an identity
//! gateway that forwards the verified subject in `X-User-Id`.  WebSocket
//! upgrades from browsers cannot set headers, so `user_id` (and `token`) are
//! also accepted as query parameters.

use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Uri};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use parley_core::ChatError;
use parley_shared::UserId;

use crate::api::AppState;
use crate::error::ServerError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated user making the request.
#[derive(Debug, Clone)]
pub struct Caller(pub UserId);

#[derive(Debug, Default, Deserialize)]
struct AuthQuery {
    user_id: Option<String>,
    token: Option<String>,
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(
            &parts.headers,
            auth_query(&parts.uri),
            state.config.gateway_token.as_deref(),
        )
        .map(Caller)
        .map_err(ServerError::from)
    }
}

fn auth_query(uri: &Uri) -> AuthQuery {
    Query::<AuthQuery>::try_from_uri(uri)
        .map(|q| q.0)
        .unwrap_or_default()
}

/// The caller's id, but only when a gateway token is configured and the
/// request presents it.  Without a token the claimed id is unverified.
pub fn gateway_verified_user(
    headers: &HeaderMap,
    uri: &Uri,
    gateway_token: Option<&str>,
) -> Option<UserId> {
    gateway_token?;
    authenticate(headers, auth_query(uri), gateway_token).ok()
}

fn authenticate(
    headers: &HeaderMap,
    query: AuthQuery,
    gateway_token: Option<&str>,
) -> Result<UserId, ChatError> {
    if let Some(expected) = gateway_token {
        let presented = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|auth| auth.strip_prefix("Bearer "))
            .map(str::to_string)
            .or(query.token)
            .unwrap_or_default();
        if !token_matches(&presented, expected) {
            return Err(ChatError::Unauthenticated);
        }
    }

    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.user_id)
        .ok_or(ChatError::Unauthenticated)?;
    UserId::parse(&raw).map_err(|_| ChatError::Unauthenticated)
}

/// Constant-time comparison to prevent timing attacks on the gateway token.
fn token_matches(presented: &str, expected: &str) -> bool {
    let presented = presented.as_bytes();
    let expected = expected.as_bytes();
    presented.len() == expected.len() && presented.ct_eq(expected).unwrap_u8() == 1
}
