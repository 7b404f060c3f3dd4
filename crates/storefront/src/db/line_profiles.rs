//! LINE profile repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use hinata_core::{CustomerId, Email};

use super::RepositoryError;
use crate::models::{LineProfile, LineProfileUpsert};

/// Storage for LINE-linked members.
#[async_trait]
pub trait LineProfileRepository: Send + Sync {
    async fn get(&self, line_user_id: &str) -> Result<Option<LineProfile>, RepositoryError>;

    /// Profile whose bound email matches, if any.
    async fn get_by_email(&self, email: &Email) -> Result<Option<LineProfile>, RepositoryError>;

    /// Insert or refresh the profile on login.
    ///
    /// An existing email is only replaced when the upsert carries one.
    /// Customer ID and metadata are left alone.
    async fn upsert(&self, profile: LineProfileUpsert) -> Result<LineProfile, RepositoryError>;

    async fn set_customer_id(
        &self,
        line_user_id: &str,
        customer_id: &CustomerId,
    ) -> Result<(), RepositoryError>;

    async fn set_email(&self, line_user_id: &str, email: &Email) -> Result<(), RepositoryError>;
}

#[derive(Debug, sqlx::FromRow)]
struct LineProfileRow {
    line_user_id: String,
    display_name: String,
    picture_url: Option<String>,
    customer_id: Option<String>,
    email: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LineProfileRow> for LineProfile {
    type Error = RepositoryError;

    fn try_from(row: LineProfileRow) -> Result<Self, Self::Error> {
        let email = row
            .email
            .as_deref()
            .map(Email::parse)
            .transpose()
            .map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
            })?;

        Ok(Self {
            line_user_id: row.line_user_id,
            display_name: row.display_name,
            picture_url: row.picture_url,
            customer_id: row.customer_id.and_then(CustomerId::new),
            email,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str =
    "line_user_id, display_name, picture_url, customer_id, email, metadata, created_at, updated_at";

/// `PostgreSQL` implementation of [`LineProfileRepository`].
pub struct PgLineProfileRepository {
    pool: PgPool,
}

impl PgLineProfileRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LineProfileRepository for PgLineProfileRepository {
    async fn get(&self, line_user_id: &str) -> Result<Option<LineProfile>, RepositoryError> {
        let row = sqlx::query_as::<_, LineProfileRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM hinata.line_profile WHERE line_user_id = $1"
        ))
        .bind(line_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<LineProfile>, RepositoryError> {
        let row = sqlx::query_as::<_, LineProfileRow>(&format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM hinata.line_profile
            WHERE email = $1
            ORDER BY (customer_id IS NOT NULL) DESC, updated_at DESC
            LIMIT 1
            "
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn upsert(&self, profile: LineProfileUpsert) -> Result<LineProfile, RepositoryError> {
        let row = sqlx::query_as::<_, LineProfileRow>(&format!(
            r"
            INSERT INTO hinata.line_profile (line_user_id, display_name, picture_url, email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (line_user_id) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                picture_url = EXCLUDED.picture_url,
                email = COALESCE(EXCLUDED.email, hinata.line_profile.email),
                updated_at = NOW()
            RETURNING {SELECT_COLUMNS}
            "
        ))
        .bind(&profile.line_user_id)
        .bind(&profile.display_name)
        .bind(profile.picture_url.as_deref())
        .bind(profile.email.as_ref().map(Email::as_str))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn set_customer_id(
        &self,
        line_user_id: &str,
        customer_id: &CustomerId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE hinata.line_profile
            SET customer_id = $2, updated_at = NOW()
            WHERE line_user_id = $1
            ",
        )
        .bind(line_user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn set_email(&self, line_user_id: &str, email: &Email) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE hinata.line_profile
            SET email = $2, updated_at = NOW()
            WHERE line_user_id = $1
            ",
        )
        .bind(line_user_id)
        .bind(email.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
