//! Verification code repository.
//!
//! Guarded writes are single conditional statements so concurrent requests
//! for the same code are serialised by row-level atomicity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use hinata_core::{CodePurpose, VerificationCodeId};

use super::RepositoryError;
use crate::models::{NewVerificationCode, VerificationCode};

/// Storage for one-time verification codes.
#[async_trait]
pub trait VerificationCodeRepository: Send + Sync {
    /// Persist a freshly issued code.
    async fn insert(&self, code: NewVerificationCode) -> Result<VerificationCode, RepositoryError>;

    /// Most recently issued code for `(subject, purpose)`, used or not.
    async fn latest(
        &self,
        subject: &str,
        purpose: CodePurpose,
    ) -> Result<Option<VerificationCode>, RepositoryError>;

    /// Most recently issued unused code for `(subject, purpose)`.
    async fn latest_unused(
        &self,
        subject: &str,
        purpose: CodePurpose,
    ) -> Result<Option<VerificationCode>, RepositoryError>;

    /// Count one failed comparison.
    ///
    /// Returns the new attempt count, or `None` if the code was already used
    /// or exhausted by the time the write landed.
    async fn record_failed_attempt(
        &self,
        id: VerificationCodeId,
    ) -> Result<Option<i32>, RepositoryError>;

    /// Consume the code.
    ///
    /// Returns `false` if the code was already used or exhausted.
    async fn mark_used(&self, id: VerificationCodeId) -> Result<bool, RepositoryError>;
}

#[derive(Debug, sqlx::FromRow)]
struct VerificationCodeRow {
    id: i32,
    subject: String,
    code: String,
    purpose: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    attempts: i32,
    max_attempts: i32,
    used: bool,
}

impl TryFrom<VerificationCodeRow> for VerificationCode {
    type Error = RepositoryError;

    fn try_from(row: VerificationCodeRow) -> Result<Self, Self::Error> {
        let purpose = row.purpose.parse::<CodePurpose>().map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid purpose in database: {e}"))
        })?;

        Ok(Self {
            id: VerificationCodeId::new(row.id),
            subject: row.subject,
            code: row.code,
            purpose,
            created_at: row.created_at,
            expires_at: row.expires_at,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            used: row.used,
        })
    }
}

const SELECT_COLUMNS: &str =
    "id, subject, code, purpose, created_at, expires_at, attempts, max_attempts, used";

/// `PostgreSQL` implementation of [`VerificationCodeRepository`].
pub struct PgVerificationCodeRepository {
    pool: PgPool,
}

impl PgVerificationCodeRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationCodeRepository for PgVerificationCodeRepository {
    async fn insert(&self, code: NewVerificationCode) -> Result<VerificationCode, RepositoryError> {
        let row = sqlx::query_as::<_, VerificationCodeRow>(&format!(
            r"
            INSERT INTO hinata.verification_code
                (subject, code, purpose, created_at, expires_at, max_attempts)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {SELECT_COLUMNS}
            "
        ))
        .bind(&code.subject)
        .bind(&code.code)
        .bind(code.purpose.as_str())
        .bind(code.created_at)
        .bind(code.expires_at)
        .bind(code.max_attempts)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn latest(
        &self,
        subject: &str,
        purpose: CodePurpose,
    ) -> Result<Option<VerificationCode>, RepositoryError> {
        let row = sqlx::query_as::<_, VerificationCodeRow>(&format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM hinata.verification_code
            WHERE subject = $1 AND purpose = $2
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "
        ))
        .bind(subject)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn latest_unused(
        &self,
        subject: &str,
        purpose: CodePurpose,
    ) -> Result<Option<VerificationCode>, RepositoryError> {
        let row = sqlx::query_as::<_, VerificationCodeRow>(&format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM hinata.verification_code
            WHERE subject = $1 AND purpose = $2 AND NOT used
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "
        ))
        .bind(subject)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn record_failed_attempt(
        &self,
        id: VerificationCodeId,
    ) -> Result<Option<i32>, RepositoryError> {
        let attempts = sqlx::query_scalar::<_, i32>(
            r"
            UPDATE hinata.verification_code
            SET attempts = attempts + 1
            WHERE id = $1 AND NOT used AND attempts < max_attempts
            RETURNING attempts
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempts)
    }

    async fn mark_used(&self, id: VerificationCodeId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE hinata.verification_code
            SET used = TRUE
            WHERE id = $1 AND NOT used AND attempts < max_attempts
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
