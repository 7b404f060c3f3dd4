//! Passkey ceremony challenge repository.
//!
//! Challenges are single use: consuming one deletes it in the same statement
//! that checks its scope and expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::RepositoryError;
use crate::models::{Ceremony, PasskeyChallenge};

/// Storage for pending `WebAuthn` challenges.
#[async_trait]
pub trait ChallengeRepository: Send + Sync {
    async fn insert(&self, challenge: PasskeyChallenge) -> Result<(), RepositoryError>;

    /// Delete and return the challenge state if it matches and has not expired.
    async fn consume(
        &self,
        id: Uuid,
        ceremony: Ceremony,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<serde_json::Value>, RepositoryError>;

    /// Drop expired challenges. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// `PostgreSQL` implementation of [`ChallengeRepository`].
pub struct PgChallengeRepository {
    pool: PgPool,
}

impl PgChallengeRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChallengeRepository for PgChallengeRepository {
    async fn insert(&self, challenge: PasskeyChallenge) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO hinata.passkey_challenge (id, ceremony, scope, state, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(challenge.id)
        .bind(challenge.ceremony.as_str())
        .bind(&challenge.scope)
        .bind(&challenge.state)
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn consume(
        &self,
        id: Uuid,
        ceremony: Ceremony,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<serde_json::Value>, RepositoryError> {
        let state = sqlx::query_scalar::<_, serde_json::Value>(
            r"
            DELETE FROM hinata.passkey_challenge
            WHERE id = $1 AND ceremony = $2 AND scope = $3 AND expires_at > $4
            RETURNING state
            ",
        )
        .bind(id)
        .bind(ceremony.as_str())
        .bind(scope)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM hinata.passkey_challenge WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
