//! One-time verification codes.
//!
//! Codes are single use, expire after the policy TTL, die after too many
//! wrong guesses, and cannot be re-issued for the same subject and purpose
//! inside the resend cooldown. Delivery is someone else's job: this module
//! only issues and checks codes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::instrument;

use hinata_core::CodePurpose;

use crate::config::OtpConfig;
use crate::db::{RepositoryError, VerificationCodeRepository};
use crate::models::{NewVerificationCode, VerificationCode};

/// Why a code could not be issued or verified.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// No unused code exists (never requested, or already consumed).
    #[error("no active verification code")]
    NotFound,

    #[error("verification code expired")]
    Expired,

    /// Too many wrong guesses; only a fresh code helps.
    #[error("too many failed attempts")]
    AttemptsExhausted,

    #[error("verification code mismatch ({remaining} attempts remaining)")]
    CodeMismatch { remaining: i32 },

    /// A code was issued too recently.
    #[error("verification code requested too soon, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A newly issued code, for delivery.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and checks verification codes against a repository.
#[derive(Clone)]
pub struct VerificationCodeManager {
    codes: Arc<dyn VerificationCodeRepository>,
    policy: OtpConfig,
}

impl VerificationCodeManager {
    #[must_use]
    pub fn new(codes: Arc<dyn VerificationCodeRepository>, policy: OtpConfig) -> Self {
        Self { codes, policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &OtpConfig {
        &self.policy
    }

    /// Issue a code now.
    ///
    /// # Errors
    ///
    /// See [`Self::issue_at`].
    pub async fn issue(
        &self,
        subject: &str,
        purpose: CodePurpose,
    ) -> Result<IssuedCode, VerificationError> {
        self.issue_at(subject, purpose, Utc::now()).await
    }

    /// Issue a code as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::RateLimited` if a code for the same
    /// subject and purpose was issued inside the cooldown window.
    #[instrument(skip(self))]
    pub async fn issue_at(
        &self,
        subject: &str,
        purpose: CodePurpose,
        now: DateTime<Utc>,
    ) -> Result<IssuedCode, VerificationError> {
        self.ensure_cooldown_elapsed(subject, purpose, now).await?;
        let code = generate_code(self.policy.code_length);
        self.store(subject, purpose, code, now).await
    }

    /// Verify a code now.
    ///
    /// # Errors
    ///
    /// See [`Self::verify_at`].
    pub async fn verify(
        &self,
        subject: &str,
        purpose: CodePurpose,
        supplied: &str,
    ) -> Result<(), VerificationError> {
        self.verify_at(subject, purpose, supplied, Utc::now()).await
    }

    /// Check `supplied` against the most recent unused code as of `now`.
    ///
    /// On success the code is consumed before this returns, so it cannot be
    /// replayed even if the caller's next step fails.
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is no unused code
    /// - `Expired` if `now` is at or past the expiry
    /// - `AttemptsExhausted` if the guess budget is spent
    /// - `CodeMismatch` with the remaining guesses on a wrong code
    #[instrument(skip(self, supplied))]
    pub async fn verify_at(
        &self,
        subject: &str,
        purpose: CodePurpose,
        supplied: &str,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        let record = self
            .codes
            .latest_unused(subject, purpose)
            .await?
            .ok_or(VerificationError::NotFound)?;

        if record.is_expired_at(now) {
            return Err(VerificationError::Expired);
        }
        if record.is_exhausted() {
            return Err(VerificationError::AttemptsExhausted);
        }

        if !codes_match(&record.code, supplied) {
            // Lost a race: the code was consumed or exhausted meanwhile.
            let Some(attempts) = self.codes.record_failed_attempt(record.id).await? else {
                return Err(self.settled_state(subject, purpose, &record).await?);
            };
            let remaining = (record.max_attempts - attempts).max(0);
            tracing::info!(remaining, "verification code mismatch");
            return Err(VerificationError::CodeMismatch { remaining });
        }

        // Lost a race with another request for the same code.
        if !self.codes.mark_used(record.id).await? {
            return Err(VerificationError::NotFound);
        }

        tracing::info!("verification code consumed");
        Ok(())
    }

    /// Why a code that was open when loaded refused a write.
    async fn settled_state(
        &self,
        subject: &str,
        purpose: CodePurpose,
        loaded: &VerificationCode,
    ) -> Result<VerificationError, VerificationError> {
        let current = self.codes.latest_unused(subject, purpose).await?;
        Ok(match current {
            Some(code) if code.id == loaded.id && code.is_exhausted() => {
                VerificationError::AttemptsExhausted
            }
            _ => VerificationError::NotFound,
        })
    }

    /// Fail fast with `RateLimited` if a code for `subject` and `purpose`
    /// could not be issued right now. Lets callers refuse a request before
    /// writing anything else.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::RateLimited` inside the cooldown.
    pub async fn ensure_can_issue(
        &self,
        subject: &str,
        purpose: CodePurpose,
    ) -> Result<(), VerificationError> {
        self.ensure_cooldown_elapsed(subject, purpose, Utc::now()).await
    }

    async fn ensure_cooldown_elapsed(
        &self,
        subject: &str,
        purpose: CodePurpose,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        let Some(previous) = self.codes.latest(subject, purpose).await? else {
            return Ok(());
        };

        let cooldown = Duration::seconds(self.policy.resend_cooldown_seconds);
        let elapsed = now - previous.created_at;
        if elapsed < cooldown {
            let wait = (cooldown - elapsed).num_seconds().max(1);
            return Err(VerificationError::RateLimited {
                retry_after_secs: u64::try_from(wait).unwrap_or(1),
            });
        }
        Ok(())
    }

    async fn store(
        &self,
        subject: &str,
        purpose: CodePurpose,
        code: String,
        now: DateTime<Utc>,
    ) -> Result<IssuedCode, VerificationError> {
        let expires_at = now + Duration::seconds(self.policy.ttl_seconds);
        let record = self
            .codes
            .insert(NewVerificationCode {
                subject: subject.to_owned(),
                code,
                purpose,
                created_at: now,
                expires_at,
                max_attempts: self.policy.max_attempts,
            })
            .await?;

        tracing::info!(expires_at = %record.expires_at, "verification code issued");
        Ok(IssuedCode {
            code: record.code,
            expires_at: record.expires_at,
        })
    }
}

/// Compare by digest so timing does not reveal a matching prefix.
fn codes_match(stored: &str, supplied: &str) -> bool {
    Sha256::digest(stored.as_bytes()) == Sha256::digest(supplied.as_bytes())
}

/// Generate a numeric code of `length` digits. Leading zeros are allowed.
#[must_use]
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.random_range(0..10_u8)))
        .collect()
}
