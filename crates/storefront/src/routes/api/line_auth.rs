//! LINE Login routes.
//!
//! ```text
//! GET    /api/auth/line           - Redirect to LINE with a CSRF state cookie
//! GET    /api/auth/line/callback  - Code exchange, sign-in, redirect home
//! GET    /api/auth/line/session   - Current session or {logged_in: false}
//! DELETE /api/auth/line/session   - Sign out
//! ```

use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::SignedCookieJar;
use serde::{Deserialize, Serialize};

use crate::error::clear_sentry_user;
use crate::line::{STATE_LENGTH, generate_random_string};
use crate::models::SessionPayload;
use crate::state::AppState;

use super::start_session;

/// Where the browser lands after a successful LINE login.
const AFTER_LOGIN_PATH: &str = "/";

/// Where the browser lands after a failed LINE login.
const LOGIN_ERROR_PATH: &str = "/login";

/// GET /api/auth/line
///
/// Stores a fresh CSRF state in a short-lived cookie and redirects to the
/// LINE authorize URL.
pub async fn authorize(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    let csrf_state = generate_random_string(STATE_LENGTH);
    let url = state
        .line()
        .authorization_url(&state.config().line_redirect_uri(), &csrf_state);
    let jar = state.sessions().set_line_state(jar, csrf_state);

    (jar, Redirect::to(&url)).into_response()
}

/// Callback query parameters.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by LINE when the user cancels.
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// GET /api/auth/line/callback
///
/// Every failure ends in a redirect to the login page with an `error`
/// query parameter; the browser never sees a JSON error here.
pub async fn callback(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let (jar, expected_state) = state.sessions().take_line_state(jar);

    if let Some(error) = &query.error {
        tracing::info!(
            error = %error,
            description = query.error_description.as_deref().unwrap_or_default(),
            "LINE login cancelled or denied"
        );
        return login_error(jar, "line_denied");
    }

    let state_matches = matches!(
        (&expected_state, &query.state),
        (Some(expected), Some(received)) if expected == received
    );
    if !state_matches {
        tracing::warn!("LINE callback with missing or mismatched state");
        return login_error(jar, "line_state");
    }

    let Some(code) = query.code.as_deref() else {
        return login_error(jar, "line_code");
    };

    let identity = match state
        .line()
        .identify(code, &state.config().line_redirect_uri())
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            tracing::error!(error = %e, "LINE code exchange failed");
            return login_error(jar, "line_failed");
        }
    };

    let session = match state.auth().sign_in_line(identity).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "LINE sign-in failed");
            return login_error(jar, "line_failed");
        }
    };

    match start_session(&state, jar.clone(), &session) {
        Ok(jar) => (jar, Redirect::to(AFTER_LOGIN_PATH)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "could not write session cookie");
            login_error(jar, "session")
        }
    }
}

fn login_error(jar: SignedCookieJar, reason: &str) -> Response {
    let url = format!("{LOGIN_ERROR_PATH}?error={}", urlencoding::encode(reason));
    (jar, Redirect::to(&url)).into_response()
}

/// `GET /api/auth/line/session` response.
#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionPayload>,
}

/// GET /api/auth/line/session
///
/// Never fails: no session (or a tampered cookie) is `{logged_in: false}`
/// with status 200.
pub async fn session(State(state): State<AppState>, jar: SignedCookieJar) -> Json<SessionStatus> {
    let session = state.sessions().read(&jar);
    Json(SessionStatus {
        logged_in: session.is_some(),
        session,
    })
}

/// DELETE /api/auth/line/session
pub async fn logout(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> (SignedCookieJar, Json<SessionStatus>) {
    let jar = state.sessions().destroy(jar);
    clear_sentry_user();
    (
        jar,
        Json(SessionStatus {
            logged_in: false,
            session: None,
        }),
    )
}
