// =============================================================================
// Admin authentication
// =============================================================================
//
// The admin token is read from `SCREENER_ADMIN_TOKEN` once at startup and kept
// in `AppState`. Unset or blank leaves the admin surface locked: every
// protected request is refused.
//
// Protected: forced refresh, cache invalidation (Bearer header) and the
// WebSocket feed (`?token=` query). Screener reads are public.
// =============================================================================

use std::fmt;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::app_state::AppState;

/// Environment variable holding the admin token.
pub const ADMIN_TOKEN_ENV: &str = "SCREENER_ADMIN_TOKEN";

// =============================================================================
// AdminToken
// =============================================================================

/// The configured admin secret, if any.
#[derive(Clone, Default)]
pub struct AdminToken(Option<String>);

impl AdminToken {
    /// Blank input yields an unconfigured token.
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into().trim().to_string();
        Self((!token.is_empty()).then_some(token))
    }

    pub fn from_env() -> Self {
        std::env::var(ADMIN_TOKEN_ENV)
            .map(Self::new)
            .unwrap_or_default()
    }

    pub fn is_configured(&self) -> bool {
        self.0.is_some()
    }

    /// Constant-time check of `presented`. Always false when unconfigured.
    pub fn verify(&self, presented: &str) -> bool {
        match &self.0 {
            Some(expected) => bytes_match(presented.as_bytes(), expected.as_bytes()),
            None => false,
        }
    }
}

impl fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.is_configured() { "<redacted>" } else { "<unset>" };
        f.debug_tuple("AdminToken").field(&shown).finish()
    }
}

/// Examines every byte regardless of where the first mismatch is.
fn bytes_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Credentials of an `Authorization: Bearer <token>` header. The scheme is
/// matched case-insensitively.
fn bearer_credentials(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, credentials) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| credentials.trim())
        .filter(|c| !c.is_empty())
}

// =============================================================================
// Extractor
// =============================================================================

/// Granted admin access. Carries the request path so handlers can log which
/// admin action ran.
#[derive(Debug)]
pub struct AdminAccess {
    pub action: String,
}

fn forbidden(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::FORBIDDEN, Json(json!({ "error": message })))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAccess {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let action = parts.uri.path().to_string();

        if !state.admin_token.is_configured() {
            warn!(%action, "admin request refused: {ADMIN_TOKEN_ENV} is not set");
            return Err(forbidden("admin access is not configured"));
        }
        let Some(presented) = bearer_credentials(&parts.headers) else {
            warn!(%action, "admin request without bearer credentials");
            return Err(forbidden("missing bearer token"));
        };
        if !state.admin_token.verify(presented) {
            warn!(%action, "admin request with wrong token");
            return Err(forbidden("invalid bearer token"));
        }

        Ok(AdminAccess { action })
    }
}
