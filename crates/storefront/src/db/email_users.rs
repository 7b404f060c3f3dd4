//! Email user repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use hinata_core::{CustomerId, Email, EmailUserId};

use super::{RepositoryError, map_unique_violation};
use crate::models::{EmailUser, NewEmailUser};

/// Storage for email/password members.
#[async_trait]
pub trait EmailUserRepository: Send + Sync {
    async fn get_by_id(&self, id: EmailUserId) -> Result<Option<EmailUser>, RepositoryError>;

    async fn get_by_email(&self, email: &Email) -> Result<Option<EmailUser>, RepositoryError>;

    /// Insert an unverified user.
    ///
    /// Returns `RepositoryError::Conflict` if the email is taken.
    async fn create(&self, user: NewEmailUser) -> Result<EmailUser, RepositoryError>;

    /// Overwrite credentials of a user that has not verified yet.
    ///
    /// Returns `None` if the user is already verified.
    async fn refresh_unverified(
        &self,
        id: EmailUserId,
        password_hash: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<Option<EmailUser>, RepositoryError>;

    /// Flag the email as verified.
    async fn mark_verified(
        &self,
        id: EmailUserId,
        at: DateTime<Utc>,
    ) -> Result<EmailUser, RepositoryError>;

    async fn set_customer_id(
        &self,
        id: EmailUserId,
        customer_id: &CustomerId,
    ) -> Result<(), RepositoryError>;

    async fn update_password(
        &self,
        id: EmailUserId,
        password_hash: &str,
    ) -> Result<(), RepositoryError>;
}

#[derive(Debug, sqlx::FromRow)]
struct EmailUserRow {
    id: i32,
    email: String,
    password_hash: String,
    name: String,
    phone: Option<String>,
    email_verified: bool,
    email_verified_at: Option<DateTime<Utc>>,
    customer_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EmailUserRow> for EmailUser {
    type Error = RepositoryError;

    fn try_from(row: EmailUserRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;

        Ok(Self {
            id: EmailUserId::new(row.id),
            email,
            password_hash: row.password_hash,
            name: row.name,
            phone: row.phone,
            email_verified: row.email_verified,
            email_verified_at: row.email_verified_at,
            customer_id: row.customer_id.and_then(CustomerId::new),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, email, password_hash, name, phone, email_verified, \
     email_verified_at, customer_id, created_at, updated_at";

/// `PostgreSQL` implementation of [`EmailUserRepository`].
pub struct PgEmailUserRepository {
    pool: PgPool,
}

impl PgEmailUserRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailUserRepository for PgEmailUserRepository {
    async fn get_by_id(&self, id: EmailUserId) -> Result<Option<EmailUser>, RepositoryError> {
        let row = sqlx::query_as::<_, EmailUserRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM hinata.email_user WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<EmailUser>, RepositoryError> {
        let row = sqlx::query_as::<_, EmailUserRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM hinata.email_user WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn create(&self, user: NewEmailUser) -> Result<EmailUser, RepositoryError> {
        let row = sqlx::query_as::<_, EmailUserRow>(&format!(
            r"
            INSERT INTO hinata.email_user (email, password_hash, name, phone)
            VALUES ($1, $2, $3, $4)
            RETURNING {SELECT_COLUMNS}
            "
        ))
        .bind(user.email.as_str())
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.phone.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "email"))?;

        row.try_into()
    }

    async fn refresh_unverified(
        &self,
        id: EmailUserId,
        password_hash: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<Option<EmailUser>, RepositoryError> {
        let row = sqlx::query_as::<_, EmailUserRow>(&format!(
            r"
            UPDATE hinata.email_user
            SET password_hash = $2, name = $3, phone = COALESCE($4, phone), updated_at = NOW()
            WHERE id = $1 AND NOT email_verified
            RETURNING {SELECT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(password_hash)
        .bind(name)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn mark_verified(
        &self,
        id: EmailUserId,
        at: DateTime<Utc>,
    ) -> Result<EmailUser, RepositoryError> {
        let row = sqlx::query_as::<_, EmailUserRow>(&format!(
            r"
            UPDATE hinata.email_user
            SET email_verified = TRUE,
                email_verified_at = COALESCE(email_verified_at, $2),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {SELECT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        row.try_into()
    }

    async fn set_customer_id(
        &self,
        id: EmailUserId,
        customer_id: &CustomerId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE hinata.email_user SET customer_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_password(
        &self,
        id: EmailUserId,
        password_hash: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE hinata.email_user SET password_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
