//! Passkey ceremonies.
//!
//! webauthn-rs does the cryptography. This module owns the challenge
//! lifecycle around it: every ceremony start stores its state as a
//! single-use challenge scoped to the ceremony and the identity, with a
//! short expiry; every finish consumes exactly that challenge or fails.
//! After an assertion the new signature counter is written through a
//! conditional update, so a counter that does not advance is rejected even
//! when two assertions race.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;
use webauthn_rs::prelude::*;

use hinata_core::{AuthMethod, CredentialOwner, Email, PasskeyRowId, WebAuthnCredentialId};

use crate::db::{RepositoryError, Repositories};
use crate::models::{
    Ceremony, NewPasskeyCredential, PasskeyChallenge, PasskeyCredential, PasskeySummary,
    SessionPayload,
};
use crate::services::auth::{email_session, line_session};

/// How long a ceremony challenge stays usable.
const CHALLENGE_TTL_SECONDS: i64 = 5 * 60;

/// Longest device name kept.
const MAX_DEVICE_NAME_LENGTH: usize = 64;

const DEFAULT_DEVICE_NAME: &str = "Passkey";

/// Errors from passkey ceremonies.
#[derive(Debug, Error)]
pub enum PasskeyError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] hinata_core::EmailError),

    /// No matching unexpired challenge (unknown, expired, consumed, or
    /// issued for another ceremony or identity).
    #[error("challenge not found or expired")]
    ChallengeNotFound,

    /// No passkeys registered for the email.
    #[error("no passkeys registered for this account")]
    NoCredentials,

    /// The asserted credential is unknown or deactivated.
    #[error("credential not found")]
    CredentialNotFound,

    /// The signature counter did not advance.
    #[error("passkey signature counter did not advance")]
    CounterRejected,

    /// The owning identity record no longer exists.
    #[error("account not found")]
    OwnerNotFound,

    /// webauthn-rs rejected the ceremony.
    #[error("webauthn error: {0}")]
    WebAuthn(#[from] WebauthnError),

    /// Stored ceremony state could not be (de)serialised.
    #[error("invalid ceremony state: {0}")]
    InvalidState(#[from] serde_json::Error),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// A started ceremony: the challenge ID to echo back, and the options for
/// `navigator.credentials`.
#[derive(Debug)]
pub struct CeremonyStart<T> {
    pub challenge_id: Uuid,
    pub options: T,
}

/// Passkey registration, authentication and management.
#[derive(Clone)]
pub struct PasskeyService {
    repos: Repositories,
    webauthn: Arc<Webauthn>,
    rp_id: String,
}

impl PasskeyService {
    #[must_use]
    pub const fn new(repos: Repositories, webauthn: Arc<Webauthn>, rp_id: String) -> Self {
        Self {
            repos,
            webauthn,
            rp_id,
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Start registering a passkey for `owner`.
    ///
    /// Passkeys the owner already has are excluded so the same authenticator
    /// is not registered twice.
    ///
    /// # Errors
    ///
    /// Returns `PasskeyError::WebAuthn` if the challenge cannot be generated.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn start_registration(
        &self,
        owner: &CredentialOwner,
        user_name: &str,
        display_name: &str,
    ) -> Result<CeremonyStart<CreationChallengeResponse>, PasskeyError> {
        let existing = self.repos.passkeys.list_active_by_owner(owner).await?;
        let exclude_credentials: Vec<CredentialID> = existing
            .iter()
            .map(|c| c.passkey.cred_id().clone())
            .collect();

        let (options, reg_state) = self.webauthn.start_passkey_registration(
            user_handle(owner),
            user_name,
            display_name,
            Some(exclude_credentials),
        )?;

        let challenge_id = self
            .store_challenge(
                Ceremony::Registration,
                owner.scope_key(),
                serde_json::to_value(&reg_state)?,
                Utc::now(),
            )
            .await?;

        Ok(CeremonyStart {
            challenge_id,
            options,
        })
    }

    /// Finish registration and store the passkey.
    ///
    /// # Errors
    ///
    /// Returns `PasskeyError::ChallengeNotFound` if the challenge is not a
    /// pending registration of `owner`, `PasskeyError::WebAuthn` if the
    /// attestation does not verify.
    #[instrument(skip(self, email, credential), fields(owner = %owner))]
    pub async fn finish_registration(
        &self,
        owner: &CredentialOwner,
        email: Option<Email>,
        challenge_id: Uuid,
        credential: &RegisterPublicKeyCredential,
        device_name: Option<&str>,
    ) -> Result<PasskeyCredential, PasskeyError> {
        let state = self
            .consume_challenge(challenge_id, Ceremony::Registration, &owner.scope_key())
            .await?;
        let reg_state: PasskeyRegistration = serde_json::from_value(state)?;

        let passkey = self
            .webauthn
            .finish_passkey_registration(credential, &reg_state)?;

        let transports = credential
            .response
            .transports
            .iter()
            .flatten()
            .filter_map(|t| serde_json::to_value(t).ok())
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect();

        let stored = self
            .repos
            .passkeys
            .create(NewPasskeyCredential {
                owner: owner.clone(),
                email,
                passkey,
                rp_id: self.rp_id.clone(),
                transports,
                device_name: clean_device_name(device_name),
            })
            .await?;

        tracing::info!(passkey_id = %stored.id, "passkey registered");
        Ok(stored)
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Start a passkey sign-in for `email`.
    ///
    /// # Errors
    ///
    /// Returns `PasskeyError::NoCredentials` if the email has no active
    /// passkeys.
    #[instrument(skip(self, email), fields(email = %email))]
    pub async fn start_authentication(
        &self,
        email: &str,
    ) -> Result<CeremonyStart<RequestChallengeResponse>, PasskeyError> {
        let email = Email::parse(email)?;
        let credentials = self.repos.passkeys.list_active_by_email(&email).await?;
        if credentials.is_empty() {
            return Err(PasskeyError::NoCredentials);
        }

        let passkeys: Vec<Passkey> = credentials.into_iter().map(|c| c.passkey).collect();
        let (options, auth_state) = self.webauthn.start_passkey_authentication(&passkeys)?;

        let challenge_id = self
            .store_challenge(
                Ceremony::Authentication,
                signin_scope(&email),
                serde_json::to_value(&auth_state)?,
                Utc::now(),
            )
            .await?;

        Ok(CeremonyStart {
            challenge_id,
            options,
        })
    }

    /// Finish a passkey sign-in and persist the new signature counter.
    ///
    /// The counter is stored before this returns; the caller mints the
    /// session only after that. A counter must strictly exceed the stored
    /// one, except that a stored and presented counter of both zero is
    /// accepted on every use: authenticators that do not implement a
    /// counter (most synced passkeys) always report zero.
    ///
    /// # Errors
    ///
    /// Returns `PasskeyError::ChallengeNotFound` for an unknown or spent
    /// challenge, `PasskeyError::WebAuthn` for a bad assertion, and
    /// `PasskeyError::CounterRejected` for a replayed counter.
    #[instrument(skip(self, email, credential), fields(email = %email))]
    pub async fn finish_authentication(
        &self,
        email: &str,
        challenge_id: Uuid,
        credential: &PublicKeyCredential,
    ) -> Result<PasskeyCredential, PasskeyError> {
        let email = Email::parse(email)?;
        let state = self
            .consume_challenge(challenge_id, Ceremony::Authentication, &signin_scope(&email))
            .await?;
        let auth_state: PasskeyAuthentication = serde_json::from_value(state)?;

        let result = self
            .webauthn
            .finish_passkey_authentication(credential, &auth_state)?;

        let raw_id: &[u8] = result.cred_id().as_ref();
        let credential_id = WebAuthnCredentialId::from(raw_id);
        let mut stored = self
            .repos
            .passkeys
            .get_active(&credential_id)
            .await?
            .ok_or(PasskeyError::CredentialNotFound)?;

        stored.passkey.update_credential(&result);
        let now = Utc::now();
        self.record_counter(&stored, result.counter(), now).await?;

        stored.sign_count = result.counter();
        stored.last_used_at = Some(now);
        tracing::info!(passkey_id = %stored.id, "passkey sign-in");
        Ok(stored)
    }

    /// Session for the owner of a passkey that just signed in.
    ///
    /// # Errors
    ///
    /// Returns `PasskeyError::OwnerNotFound` if the owning record is gone.
    pub async fn session_for(
        &self,
        credential: &PasskeyCredential,
    ) -> Result<SessionPayload, PasskeyError> {
        match &credential.owner {
            CredentialOwner::Email(id) => {
                let user = self
                    .repos
                    .email_users
                    .get_by_id(*id)
                    .await?
                    .ok_or(PasskeyError::OwnerNotFound)?;
                let line = self.repos.line_profiles.get_by_email(&user.email).await?;
                Ok(email_session(&user, AuthMethod::Passkey, line.as_ref()))
            }
            CredentialOwner::Line(line_user_id) => {
                let profile = self
                    .repos
                    .line_profiles
                    .get(line_user_id)
                    .await?
                    .ok_or(PasskeyError::OwnerNotFound)?;
                let email_user = match &profile.email {
                    Some(email) => self.repos.email_users.get_by_email(email).await?,
                    None => None,
                };
                let mut session = line_session(&profile, email_user.as_ref());
                session.auth_method = AuthMethod::Passkey;
                Ok(session)
            }
        }
    }

    // =========================================================================
    // Management
    // =========================================================================

    /// Active passkeys of `owner`.
    ///
    /// # Errors
    ///
    /// Returns `PasskeyError::Repository` if the lookup fails.
    pub async fn list(&self, owner: &CredentialOwner) -> Result<Vec<PasskeySummary>, PasskeyError> {
        let credentials = self.repos.passkeys.list_active_by_owner(owner).await?;
        Ok(credentials.iter().map(PasskeyCredential::summary).collect())
    }

    /// Soft-delete one of `owner`'s passkeys. Returns `false` if there was
    /// no such active passkey.
    ///
    /// # Errors
    ///
    /// Returns `PasskeyError::Repository` if the update fails.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn remove(&self, owner: &CredentialOwner, id: PasskeyRowId) -> Result<bool, PasskeyError> {
        let removed = self.repos.passkeys.deactivate(owner, id).await?;
        if removed {
            tracing::info!(passkey_id = %id, "passkey deactivated");
        }
        Ok(removed)
    }

    // =========================================================================
    // Challenges and counters
    // =========================================================================

    async fn store_challenge(
        &self,
        ceremony: Ceremony,
        scope: String,
        state: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Uuid, PasskeyError> {
        let removed = self.repos.challenges.purge_expired(now).await?;
        if removed > 0 {
            tracing::debug!(removed, "purged expired passkey challenges");
        }

        let id = Uuid::new_v4();
        self.repos
            .challenges
            .insert(PasskeyChallenge {
                id,
                ceremony,
                scope,
                state,
                created_at: now,
                expires_at: now + Duration::seconds(CHALLENGE_TTL_SECONDS),
            })
            .await?;
        Ok(id)
    }

    async fn consume_challenge(
        &self,
        id: Uuid,
        ceremony: Ceremony,
        scope: &str,
    ) -> Result<serde_json::Value, PasskeyError> {
        self.repos
            .challenges
            .consume(id, ceremony, scope, Utc::now())
            .await?
            .ok_or(PasskeyError::ChallengeNotFound)
    }

    async fn record_counter(
        &self,
        credential: &PasskeyCredential,
        new_count: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), PasskeyError> {
        let advanced = self
            .repos
            .passkeys
            .advance_counter(&credential.credential_id, new_count, &credential.passkey, used_at)
            .await?;
        if !advanced {
            tracing::warn!(
                passkey_id = %credential.id,
                stored = credential.sign_count,
                presented = new_count,
                "passkey counter did not advance, possible cloned authenticator"
            );
            return Err(PasskeyError::CounterRejected);
        }
        Ok(())
    }
}

/// Challenge scope for a sign-in by email.
fn signin_scope(email: &Email) -> String {
    format!("signin:{email}")
}

/// Stable WebAuthn user handle for an owner.
fn user_handle(owner: &CredentialOwner) -> Uuid {
    let digest = Sha256::digest(owner.scope_key().as_bytes());
    let mut bytes = [0_u8; 16];
    bytes.copy_from_slice(digest.get(..16).unwrap_or(&[0; 16]));
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

fn clean_device_name(name: Option<&str>) -> String {
    let name = name.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return DEFAULT_DEVICE_NAME.to_owned();
    }
    name.chars().take(MAX_DEVICE_NAME_LENGTH).collect()
}

/// Build the relying party from the public base URL.
///
/// # Errors
///
/// Returns an error if the URL has no host or webauthn-rs rejects it.
pub fn create_webauthn(base_url: &str, rp_name: &str) -> Result<(Webauthn, String), WebauthnConfigError> {
    let url = url::Url::parse(base_url)?;
    let rp_id = url
        .host_str()
        .ok_or(WebauthnConfigError::MissingHost)?
        .to_owned();

    let webauthn = WebauthnBuilder::new(&rp_id, &url)?
        .rp_name(rp_name)
        .allow_subdomains(false)
        .build()?;
    Ok((webauthn, rp_id))
}

/// Error creating the `WebAuthn` relying party.
#[derive(Debug, Error)]
pub enum WebauthnConfigError {
    #[error("invalid base_url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("base_url must have a host")]
    MissingHost,
    #[error("webauthn error: {0}")]
    WebAuthn(#[from] WebauthnError),
}
