//! Passkey credential repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use webauthn_rs::prelude::Passkey;

use hinata_core::{CredentialOwner, Email, PasskeyRowId, WebAuthnCredentialId};

use super::{RepositoryError, map_unique_violation};
use crate::models::{NewPasskeyCredential, PasskeyCredential};

/// Storage for `WebAuthn` passkeys.
#[async_trait]
pub trait PasskeyRepository: Send + Sync {
    async fn create(
        &self,
        credential: NewPasskeyCredential,
    ) -> Result<PasskeyCredential, RepositoryError>;

    async fn list_active_by_owner(
        &self,
        owner: &CredentialOwner,
    ) -> Result<Vec<PasskeyCredential>, RepositoryError>;

    async fn list_active_by_email(
        &self,
        email: &Email,
    ) -> Result<Vec<PasskeyCredential>, RepositoryError>;

    async fn get_active(
        &self,
        credential_id: &WebAuthnCredentialId,
    ) -> Result<Option<PasskeyCredential>, RepositoryError>;

    /// Store a new signature counter after a successful assertion.
    ///
    /// The write only lands if the counter strictly advances (or both the
    /// stored and new counter are zero, for authenticators without one).
    /// Returns `false` when the guard rejects it.
    async fn advance_counter(
        &self,
        credential_id: &WebAuthnCredentialId,
        new_count: u32,
        passkey: &Passkey,
        used_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Soft-delete a passkey belonging to `owner`.
    async fn deactivate(
        &self,
        owner: &CredentialOwner,
        id: PasskeyRowId,
    ) -> Result<bool, RepositoryError>;
}

/// Counter acceptance rule shared by every implementation.
#[must_use]
pub const fn counter_advances(stored: u32, new_count: u32) -> bool {
    new_count > stored || (stored == 0 && new_count == 0)
}

#[derive(Debug, sqlx::FromRow)]
struct PasskeyRow {
    id: i32,
    credential_id: Vec<u8>,
    owner_type: String,
    owner_id: String,
    email: Option<String>,
    passkey: serde_json::Value,
    sign_count: i64,
    rp_id: String,
    transports: Vec<String>,
    device_name: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl TryFrom<PasskeyRow> for PasskeyCredential {
    type Error = RepositoryError;

    fn try_from(row: PasskeyRow) -> Result<Self, Self::Error> {
        let owner = CredentialOwner::from_parts(&row.owner_type, &row.owner_id).ok_or_else(|| {
            RepositoryError::DataCorruption(format!(
                "invalid passkey owner in database: {}:{}",
                row.owner_type, row.owner_id
            ))
        })?;
        let email = row
            .email
            .as_deref()
            .map(Email::parse)
            .transpose()
            .map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
            })?;
        let passkey: Passkey = serde_json::from_value(row.passkey).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid passkey in database: {e}"))
        })?;
        let sign_count = u32::try_from(row.sign_count).map_err(|_| {
            RepositoryError::DataCorruption(format!(
                "sign count out of range: {}",
                row.sign_count
            ))
        })?;

        Ok(Self {
            id: PasskeyRowId::new(row.id),
            credential_id: WebAuthnCredentialId::new(row.credential_id),
            owner,
            email,
            passkey,
            sign_count,
            rp_id: row.rp_id,
            transports: row.transports,
            device_name: row.device_name,
            is_active: row.is_active,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, credential_id, owner_type, owner_id, email, passkey, \
     sign_count, rp_id, transports, device_name, is_active, created_at, last_used_at";

fn passkey_json(passkey: &Passkey) -> Result<serde_json::Value, RepositoryError> {
    serde_json::to_value(passkey)
        .map_err(|e| RepositoryError::DataCorruption(format!("cannot serialise passkey: {e}")))
}

/// `PostgreSQL` implementation of [`PasskeyRepository`].
pub struct PgPasskeyRepository {
    pool: PgPool,
}

impl PgPasskeyRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PasskeyRepository for PgPasskeyRepository {
    async fn create(
        &self,
        credential: NewPasskeyCredential,
    ) -> Result<PasskeyCredential, RepositoryError> {
        let credential_id: &[u8] = credential.passkey.cred_id().as_ref();
        let sign_count = 0_i64;

        let row = sqlx::query_as::<_, PasskeyRow>(&format!(
            r"
            INSERT INTO hinata.passkey_credential
                (credential_id, owner_type, owner_id, email, passkey, sign_count,
                 rp_id, transports, device_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {SELECT_COLUMNS}
            "
        ))
        .bind(credential_id)
        .bind(credential.owner.kind())
        .bind(credential.owner.owner_id())
        .bind(credential.email.as_ref().map(Email::as_str))
        .bind(passkey_json(&credential.passkey)?)
        .bind(sign_count)
        .bind(&credential.rp_id)
        .bind(&credential.transports)
        .bind(&credential.device_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "passkey"))?;

        row.try_into()
    }

    async fn list_active_by_owner(
        &self,
        owner: &CredentialOwner,
    ) -> Result<Vec<PasskeyCredential>, RepositoryError> {
        let rows = sqlx::query_as::<_, PasskeyRow>(&format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM hinata.passkey_credential
            WHERE owner_type = $1 AND owner_id = $2 AND is_active
            ORDER BY created_at
            "
        ))
        .bind(owner.kind())
        .bind(owner.owner_id())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_active_by_email(
        &self,
        email: &Email,
    ) -> Result<Vec<PasskeyCredential>, RepositoryError> {
        let rows = sqlx::query_as::<_, PasskeyRow>(&format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM hinata.passkey_credential
            WHERE email = $1 AND is_active
            ORDER BY created_at
            "
        ))
        .bind(email.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_active(
        &self,
        credential_id: &WebAuthnCredentialId,
    ) -> Result<Option<PasskeyCredential>, RepositoryError> {
        let row = sqlx::query_as::<_, PasskeyRow>(&format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM hinata.passkey_credential
            WHERE credential_id = $1 AND is_active
            "
        ))
        .bind(credential_id.as_bytes())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn advance_counter(
        &self,
        credential_id: &WebAuthnCredentialId,
        new_count: u32,
        passkey: &Passkey,
        used_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE hinata.passkey_credential
            SET sign_count = $2, passkey = $3, last_used_at = $4
            WHERE credential_id = $1
              AND is_active
              AND (sign_count < $2 OR (sign_count = 0 AND $2 = 0))
            ",
        )
        .bind(credential_id.as_bytes())
        .bind(i64::from(new_count))
        .bind(passkey_json(passkey)?)
        .bind(used_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn deactivate(
        &self,
        owner: &CredentialOwner,
        id: PasskeyRowId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE hinata.passkey_credential
            SET is_active = FALSE
            WHERE id = $1 AND owner_type = $2 AND owner_id = $3 AND is_active
            ",
        )
        .bind(id)
        .bind(owner.kind())
        .bind(owner.owner_id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
