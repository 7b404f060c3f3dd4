//! JSON API routes.
//!
//! Every endpoint answers `{"success": true, ...}` on success and an
//! [`AppError`] body otherwise.

pub mod email_auth;
pub mod line_auth;
pub mod member;
pub mod passkey;
pub mod revalidate;

use axum_extra::extract::SignedCookieJar;
use serde::Serialize;

use crate::error::{AppError, set_sentry_user};
use crate::models::SessionPayload;
use crate::state::AppState;

/// `{"success": true}`.
#[derive(Debug, Serialize)]
pub struct Success {
    pub success: bool,
}

impl Success {
    #[must_use]
    pub const fn new() -> Self {
        Self { success: true }
    }
}

impl Default for Success {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `payload` as the session cookie and tag the Sentry scope.
pub(crate) fn start_session(
    state: &AppState,
    jar: SignedCookieJar,
    payload: &SessionPayload,
) -> Result<SignedCookieJar, AppError> {
    let jar = state
        .sessions()
        .create(jar, payload)
        .map_err(|e| AppError::Internal(format!("session encode: {e}")))?;

    let sentry_id = payload
        .customer_id
        .as_ref()
        .map(ToString::to_string)
        .or_else(|| payload.email_user_id.map(|id| format!("email:{id}")))
        .or_else(|| payload.line_user_id.as_ref().map(|id| format!("line:{id}")));
    if let Some(id) = sentry_id {
        set_sentry_user(&id, payload.email.as_deref());
    }

    tracing::info!(auth_method = payload.auth_method.as_str(), "session started");
    Ok(jar)
}
