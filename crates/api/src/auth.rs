//! Header-based caller identification.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use domain::{SessionId, UserId};
use hmac::digest::CtOutput;
use saga::services::{ADMIN_KEY_HEADER, INTERNAL_KEY_HEADER, SESSION_ID_HEADER, USER_ID_HEADER};
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::AppState;

/// A caller that presented the internal service key.
#[derive(Debug, Clone, Copy)]
pub struct InternalCaller;

/// A caller that presented the catalog admin key.
#[derive(Debug, Clone, Copy)]
pub struct AdminCaller;

/// End-user identity forwarded by the gateway in front of this service.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
}

impl FromRequestParts<Arc<AppState>> for InternalCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if is_internal(&parts.headers, state) {
            Ok(InternalCaller)
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

impl FromRequestParts<Arc<AppState>> for AdminCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if key_matches(&parts.headers, ADMIN_KEY_HEADER, &state.admin_key) {
            Ok(AdminCaller)
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Identity {
            user_id: header(&parts.headers, USER_ID_HEADER).and_then(|v| UserId::new(v).ok()),
            session_id: header(&parts.headers, SESSION_ID_HEADER)
                .and_then(|v| SessionId::new(v).ok()),
        })
    }
}

/// Returns true if the request carries the internal service key.
pub fn is_internal(headers: &HeaderMap, state: &AppState) -> bool {
    key_matches(headers, INTERNAL_KEY_HEADER, &state.internal_key)
}

/// Returns a header value as a trimmed string, if present and non-blank.
pub fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn key_matches(headers: &HeaderMap, name: &str, expected: &str) -> bool {
    match header(headers, name) {
        Some(presented) => keys_match(presented.as_bytes(), expected.as_bytes()),
        None => false,
    }
}

/// Compares SHA-256 digests of both keys in constant time; the timing does
/// not depend on either key's length.
fn keys_match(presented: &[u8], expected: &[u8]) -> bool {
    CtOutput::<Sha256>::new(Sha256::digest(presented))
        == CtOutput::new(Sha256::digest(expected))
}
