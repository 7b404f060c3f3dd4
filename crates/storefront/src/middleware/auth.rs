//! Session extractors.
//!
//! Both read the signed session cookie through the [`SessionManager`] held
//! in [`AppState`]. A cookie with a bad signature or an unreadable payload
//! counts as no session.
//!
//! [`SessionManager`]: crate::services::session::SessionManager

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::SignedCookieJar;

use crate::error::AppError;
use crate::models::SessionPayload;
use crate::state::AppState;

/// Extractor that requires a session.
///
/// Rejects with `401 {"success": false, "error": ...}` when absent.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(
///     RequireSession(session): RequireSession,
/// ) -> impl IntoResponse {
///     format!("Hello, {}!", session.display_name)
/// }
/// ```
pub struct RequireSession(pub SessionPayload);

impl FromRequestParts<AppState> for RequireSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let OptionalSession(session) = OptionalSession::from_request_parts(parts, state)
            .await
            .unwrap_or(OptionalSession(None));

        session
            .map(Self)
            .ok_or_else(|| AppError::Unauthorized("Please sign in".to_owned()))
    }
}

/// Extractor that optionally gets the session.
///
/// Unlike `RequireSession`, this does not reject the request when there is
/// no session.
pub struct OptionalSession(pub Option<SessionPayload>);

impl FromRequestParts<AppState> for OptionalSession {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = SignedCookieJar::from_request_parts(parts, state).await?;
        Ok(Self(state.sessions().read(&jar)))
    }
}
