//! Passkey (`WebAuthn`) routes.
//!
//! ```text
//! POST   /api/auth/passkey/register/options      - Start registration (session required)
//! POST   /api/auth/passkey/register/verify       - Finish registration (session required)
//! POST   /api/auth/passkey/authenticate/options  - Start sign-in by email
//! POST   /api/auth/passkey/authenticate/verify   - Finish sign-in, start session
//! GET    /api/auth/passkey                       - List own passkeys
//! DELETE /api/auth/passkey/{id}                  - Deactivate one of own passkeys
//! ```
//!
//! Ceremony state never travels in the cookie: each `options` call returns a
//! `challengeId` which the matching `verify` call must echo back.

use axum::extract::{Path, State};
use axum_extra::extract::SignedCookieJar;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use webauthn_rs::prelude::*;

use hinata_core::{CredentialOwner, Email, PasskeyRowId};

use crate::error::{AppError, Result};
use crate::extract::Json;
use crate::middleware::RequireSession;
use crate::models::{PasskeySummary, SessionPayload};
use crate::state::AppState;

use super::{Success, start_session};

/// Credential owner of the signed-in identity.
///
/// Email identities own their passkeys; LINE-only members own them through
/// the LINE user ID.
fn owner_of(session: &SessionPayload) -> Result<CredentialOwner> {
    if let Some(id) = session.email_user_id {
        return Ok(CredentialOwner::Email(id));
    }
    session
        .line_user_id
        .clone()
        .map(CredentialOwner::Line)
        .ok_or_else(|| AppError::Unauthorized("Please sign in".to_owned()))
}

// ============================================================================
// Registration
// ============================================================================

/// Options for `navigator.credentials.create()`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptionsResponse {
    pub success: bool,
    pub challenge_id: Uuid,
    pub options: CreationChallengeResponse,
}

/// POST /api/auth/passkey/register/options
///
/// # Errors
///
/// 401 without a session.
pub async fn register_options(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
) -> Result<Json<RegistrationOptionsResponse>> {
    let owner = owner_of(&session)?;
    let user_name = session
        .email
        .clone()
        .unwrap_or_else(|| owner.owner_id());

    let start = state
        .passkeys()
        .start_registration(&owner, &user_name, &session.display_name)
        .await?;

    Ok(Json(RegistrationOptionsResponse {
        success: true,
        challenge_id: start.challenge_id,
        options: start.options,
    }))
}

/// Request to finish passkey registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterVerifyRequest {
    pub challenge_id: Uuid,
    /// The `WebAuthn` response from the authenticator.
    pub credential: RegisterPublicKeyCredential,
    /// User-assigned name for this passkey (e.g., "MacBook", "iPhone").
    #[serde(default)]
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisteredResponse {
    pub success: bool,
    pub passkey: PasskeySummary,
}

/// POST /api/auth/passkey/register/verify
///
/// # Errors
///
/// 401 without a session or for a rejected attestation, 400 for an
/// unknown or expired challenge.
pub async fn register_verify(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    Json(req): Json<RegisterVerifyRequest>,
) -> Result<Json<RegisteredResponse>> {
    let owner = owner_of(&session)?;
    let email = session.email.as_deref().and_then(|e| Email::parse(e).ok());

    let credential = state
        .passkeys()
        .finish_registration(
            &owner,
            email,
            req.challenge_id,
            &req.credential,
            req.device_name.as_deref(),
        )
        .await?;

    Ok(Json(RegisteredResponse {
        success: true,
        passkey: credential.summary(),
    }))
}

// ============================================================================
// Authentication
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AuthenticateOptionsRequest {
    pub email: String,
}

/// Options for `navigator.credentials.get()`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptionsResponse {
    pub success: bool,
    pub challenge_id: Uuid,
    pub options: RequestChallengeResponse,
}

/// POST /api/auth/passkey/authenticate/options
///
/// # Errors
///
/// 400 for an invalid email, 404 if the email has no passkeys.
pub async fn authenticate_options(
    State(state): State<AppState>,
    Json(req): Json<AuthenticateOptionsRequest>,
) -> Result<Json<AuthenticationOptionsResponse>> {
    let start = state.passkeys().start_authentication(&req.email).await?;
    Ok(Json(AuthenticationOptionsResponse {
        success: true,
        challenge_id: start.challenge_id,
        options: start.options,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateVerifyRequest {
    pub email: String,
    pub challenge_id: Uuid,
    pub credential: PublicKeyCredential,
}

#[derive(Debug, Serialize)]
pub struct PasskeySignInResponse {
    pub success: bool,
    pub session: SessionPayload,
}

/// POST /api/auth/passkey/authenticate/verify
///
/// The new signature counter is stored before the session cookie is
/// written.
///
/// # Errors
///
/// 400 for an unknown or expired challenge, 401 for a rejected assertion
/// or a counter that did not advance.
pub async fn authenticate_verify(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(req): Json<AuthenticateVerifyRequest>,
) -> Result<(SignedCookieJar, Json<PasskeySignInResponse>)> {
    let passkeys = state.passkeys();
    let credential = passkeys
        .finish_authentication(&req.email, req.challenge_id, &req.credential)
        .await?;
    let session = passkeys.session_for(&credential).await?;

    let jar = start_session(&state, jar, &session)?;
    Ok((
        jar,
        Json(PasskeySignInResponse {
            success: true,
            session,
        }),
    ))
}

// ============================================================================
// Management
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PasskeyListResponse {
    pub success: bool,
    pub passkeys: Vec<PasskeySummary>,
}

/// GET /api/auth/passkey
///
/// # Errors
///
/// 401 without a session.
pub async fn list(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
) -> Result<Json<PasskeyListResponse>> {
    let owner = owner_of(&session)?;
    let passkeys = state.passkeys().list(&owner).await?;
    Ok(Json(PasskeyListResponse {
        success: true,
        passkeys,
    }))
}

/// DELETE /api/auth/passkey/{id}
///
/// # Errors
///
/// 401 without a session, 404 if the passkey is not an active passkey of
/// the signed-in identity.
pub async fn remove(
    State(state): State<AppState>,
    RequireSession(session): RequireSession,
    Path(id): Path<i32>,
) -> Result<Json<Success>> {
    let owner = owner_of(&session)?;
    if state
        .passkeys()
        .remove(&owner, PasskeyRowId::new(id))
        .await?
    {
        Ok(Json(Success::new()))
    } else {
        Err(AppError::NotFound("Passkey not found".to_owned()))
    }
}
