//! Email/password auth routes.
//!
//! ```text
//! POST /api/auth/email/register         - Create account, send code
//! POST /api/auth/email/verify           - Confirm code, start session
//! POST /api/auth/email/login            - Password login
//! POST /api/auth/email/resend-otp       - Send a fresh code
//! POST /api/auth/email/forgot-password  - Send a reset code
//! POST /api/auth/email/reset-password   - Set a new password with a code
//! POST /api/auth/email/bind             - LINE member: send code to an email
//! POST /api/auth/email/bind-verify      - LINE member: confirm the email
//! ```

use axum::extract::State;
use axum_extra::extract::SignedCookieJar;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::extract::Json;
use crate::middleware::{OptionalSession, RequireSession};
use crate::models::{EmailUserSummary, SessionPayload};
use crate::services::auth::{CodeIssued, EmailSignIn, Registration};
use crate::state::AppState;

use super::{Success, start_session};

// =============================================================================
// Request/response types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendRequest {
    pub email: String,
    pub purpose: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    #[serde(alias = "new_password", rename = "newPassword")]
    pub new_password: String,
}

/// `{success, email, devCode?}`.
#[derive(Debug, Serialize)]
pub struct CodeSentResponse {
    pub success: bool,
    pub email: String,
    #[serde(rename = "devCode", skip_serializing_if = "Option::is_none")]
    pub dev_code: Option<String>,
}

impl From<CodeIssued> for CodeSentResponse {
    fn from(issued: CodeIssued) -> Self {
        Self {
            success: true,
            email: issued.email.to_string(),
            dev_code: issued.dev_code,
        }
    }
}

/// `{success, user}` after an email sign-in.
#[derive(Debug, Serialize)]
pub struct SignedInResponse {
    pub success: bool,
    pub user: EmailUserSummary,
}

/// `{success, session}` after a flow that refreshed the session.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub success: bool,
    pub session: SessionPayload,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /api/auth/email/register
///
/// # Errors
///
/// 400 for invalid input, 409 for a verified email, 429 inside the resend
/// cooldown.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<CodeSentResponse>> {
    let issued = state
        .auth()
        .register(Registration {
            email: req.email,
            password: req.password,
            name: req.name,
            phone: req.phone,
        })
        .await?;
    Ok(Json(issued.into()))
}

/// POST /api/auth/email/verify
///
/// # Errors
///
/// 400/404/429 for a bad, expired, missing or exhausted code.
pub async fn verify(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(req): Json<VerifyRequest>,
) -> Result<(SignedCookieJar, Json<SignedInResponse>)> {
    let signed_in = state.auth().verify_email(&req.email, &req.code).await?;
    signed_in_response(&state, jar, signed_in)
}

/// POST /api/auth/email/login
///
/// # Errors
///
/// 401 for bad credentials, 403 with `needsVerification` for an
/// unverified email.
pub async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(SignedCookieJar, Json<SignedInResponse>)> {
    let signed_in = state.auth().login(&req.email, &req.password).await?;
    signed_in_response(&state, jar, signed_in)
}

fn signed_in_response(
    state: &AppState,
    jar: SignedCookieJar,
    signed_in: EmailSignIn,
) -> Result<(SignedCookieJar, Json<SignedInResponse>)> {
    let jar = start_session(state, jar, &signed_in.session)?;
    Ok((
        jar,
        Json(SignedInResponse {
            success: true,
            user: signed_in.user.summary(),
        }),
    ))
}

/// POST /api/auth/email/resend-otp
///
/// Answers the same way whether or not the email has an account.
///
/// # Errors
///
/// 400 for an unknown purpose or invalid email.
pub async fn resend_otp(
    State(state): State<AppState>,
    OptionalSession(session): OptionalSession,
    Json(req): Json<ResendRequest>,
) -> Result<Json<CodeSentResponse>> {
    let issued = state
        .auth()
        .resend_code(&req.email, &req.purpose, session.as_ref())
        .await?;
    Ok(Json(issued.into()))
}

/// POST /api/auth/email/forgot-password
///
/// Answers the same way whether or not the email has an account.
///
/// # Errors
///
/// 400 for an invalid email.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> Result<Json<Success>> {
    state.auth().forgot_password(&req.email).await?;
    Ok(Json(Success::new()))
}

/// POST /api/auth/email/reset-password
///
/// # Errors
///
/// 400 for a weak password or bad code.
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<Success>> {
    state
        .auth()
        .reset_password(&req.email, &req.code, &req.new_password)
        .await?;
    Ok(Json(Success::new()))
}

/// POST /api/auth/email/bind
///
/// # Errors
///
/// 401 without a session, 403 without a LINE session, 409 if another
/// profile holds the email.
pub async fn bind(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    Json(req): Json<EmailRequest>,
) -> Result<Json<CodeSentResponse>> {
    let issued = state.auth().bind_email(&session, &req.email).await?;
    Ok(Json(issued.into()))
}

/// POST /api/auth/email/bind-verify
///
/// # Errors
///
/// As [`bind`], plus code errors.
pub async fn bind_verify(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    RequireSession(session): RequireSession,
    Json(req): Json<VerifyRequest>,
) -> Result<(SignedCookieJar, Json<SessionResponse>)> {
    let session = state
        .auth()
        .verify_bind(&session, &req.email, &req.code)
        .await?;
    let jar = start_session(&state, jar, &session)?;
    Ok((
        jar,
        Json(SessionResponse {
            success: true,
            session,
        }),
    ))
}
