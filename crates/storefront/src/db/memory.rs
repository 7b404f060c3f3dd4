//! In-memory repositories.
//!
//! Mirrors the `PostgreSQL` repositories, including the conditional-update
//! guards, so service and router tests run without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;
use webauthn_rs::prelude::Passkey;

use hinata_core::{
    CodePurpose, CredentialOwner, CustomerId, Email, EmailUserId, PasskeyRowId,
    VerificationCodeId, WebAuthnCredentialId,
};

use super::passkeys::counter_advances;
use super::{
    ChallengeRepository, EmailUserRepository, LineProfileRepository, PasskeyRepository,
    RepositoryError, VerificationCodeRepository,
};
use crate::models::{
    Ceremony, EmailUser, LineProfile, LineProfileUpsert, NewEmailUser, NewPasskeyCredential,
    NewVerificationCode, PasskeyChallenge, PasskeyCredential, VerificationCode,
};

/// Every table, behind one lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    verification_codes: Vec<VerificationCode>,
    email_users: Vec<EmailUser>,
    line_profiles: HashMap<String, LineProfile>,
    passkeys: Vec<PasskeyCredential>,
    challenges: HashMap<Uuid, PasskeyChallenge>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored email users.
    pub async fn email_user_count(&self) -> usize {
        self.tables.lock().await.email_users.len()
    }

    /// Number of codes ever issued for `(subject, purpose)`.
    pub async fn code_count(&self, subject: &str, purpose: CodePurpose) -> usize {
        self.tables
            .lock()
            .await
            .verification_codes
            .iter()
            .filter(|c| c.subject == subject && c.purpose == purpose)
            .count()
    }

    /// Number of challenges not yet consumed or purged.
    pub async fn pending_challenges(&self) -> usize {
        self.tables.lock().await.challenges.len()
    }
}

fn next_id(len: usize) -> i32 {
    i32::try_from(len).map_or(i32::MAX, |n| n.saturating_add(1))
}

fn latest_matching<'a>(
    codes: &'a [VerificationCode],
    subject: &str,
    purpose: CodePurpose,
    unused_only: bool,
) -> Option<&'a VerificationCode> {
    codes
        .iter()
        .filter(|c| c.subject == subject && c.purpose == purpose && (!unused_only || !c.used))
        .max_by_key(|c| (c.created_at, c.id.as_i32()))
}

#[async_trait]
impl VerificationCodeRepository for MemoryStore {
    async fn insert(&self, code: NewVerificationCode) -> Result<VerificationCode, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let record = VerificationCode {
            id: VerificationCodeId::new(next_id(tables.verification_codes.len())),
            subject: code.subject,
            code: code.code,
            purpose: code.purpose,
            created_at: code.created_at,
            expires_at: code.expires_at,
            attempts: 0,
            max_attempts: code.max_attempts,
            used: false,
        };
        tables.verification_codes.push(record.clone());
        Ok(record)
    }

    async fn latest(
        &self,
        subject: &str,
        purpose: CodePurpose,
    ) -> Result<Option<VerificationCode>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(latest_matching(&tables.verification_codes, subject, purpose, false).cloned())
    }

    async fn latest_unused(
        &self,
        subject: &str,
        purpose: CodePurpose,
    ) -> Result<Option<VerificationCode>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(latest_matching(&tables.verification_codes, subject, purpose, true).cloned())
    }

    async fn record_failed_attempt(
        &self,
        id: VerificationCodeId,
    ) -> Result<Option<i32>, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let Some(code) = tables.verification_codes.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        if code.used || code.attempts >= code.max_attempts {
            return Ok(None);
        }
        code.attempts += 1;
        Ok(Some(code.attempts))
    }

    async fn mark_used(&self, id: VerificationCodeId) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let Some(code) = tables.verification_codes.iter_mut().find(|c| c.id == id) else {
            return Ok(false);
        };
        if code.used || code.attempts >= code.max_attempts {
            return Ok(false);
        }
        code.used = true;
        Ok(true)
    }
}

#[async_trait]
impl EmailUserRepository for MemoryStore {
    async fn get_by_id(&self, id: EmailUserId) -> Result<Option<EmailUser>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables.email_users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<EmailUser>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables.email_users.iter().find(|u| &u.email == email).cloned())
    }

    async fn create(&self, user: NewEmailUser) -> Result<EmailUser, RepositoryError> {
        let mut tables = self.tables.lock().await;
        if tables.email_users.iter().any(|u| u.email == user.email) {
            return Err(RepositoryError::Conflict("email already exists".to_owned()));
        }
        let now = Utc::now();
        let record = EmailUser {
            id: EmailUserId::new(next_id(tables.email_users.len())),
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            phone: user.phone,
            email_verified: false,
            email_verified_at: None,
            customer_id: None,
            created_at: now,
            updated_at: now,
        };
        tables.email_users.push(record.clone());
        Ok(record)
    }

    async fn refresh_unverified(
        &self,
        id: EmailUserId,
        password_hash: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<Option<EmailUser>, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let Some(user) = tables
            .email_users
            .iter_mut()
            .find(|u| u.id == id && !u.email_verified)
        else {
            return Ok(None);
        };
        password_hash.clone_into(&mut user.password_hash);
        name.clone_into(&mut user.name);
        if let Some(phone) = phone {
            user.phone = Some(phone.to_owned());
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn mark_verified(
        &self,
        id: EmailUserId,
        at: DateTime<Utc>,
    ) -> Result<EmailUser, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .email_users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(RepositoryError::NotFound)?;
        user.email_verified = true;
        user.email_verified_at.get_or_insert(at);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_customer_id(
        &self,
        id: EmailUserId,
        customer_id: &CustomerId,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .email_users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(RepositoryError::NotFound)?;
        user.customer_id = Some(customer_id.clone());
        Ok(())
    }

    async fn update_password(
        &self,
        id: EmailUserId,
        password_hash: &str,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .email_users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(RepositoryError::NotFound)?;
        password_hash.clone_into(&mut user.password_hash);
        Ok(())
    }
}

#[async_trait]
impl LineProfileRepository for MemoryStore {
    async fn get(&self, line_user_id: &str) -> Result<Option<LineProfile>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables.line_profiles.get(line_user_id).cloned())
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<LineProfile>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .line_profiles
            .values()
            .filter(|p| p.email.as_ref() == Some(email))
            .max_by_key(|p| (p.customer_id.is_some(), p.updated_at))
            .cloned())
    }

    async fn upsert(&self, profile: LineProfileUpsert) -> Result<LineProfile, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let record = tables
            .line_profiles
            .entry(profile.line_user_id.clone())
            .and_modify(|existing| {
                existing.display_name.clone_from(&profile.display_name);
                existing.picture_url.clone_from(&profile.picture_url);
                if profile.email.is_some() {
                    existing.email.clone_from(&profile.email);
                }
                existing.updated_at = now;
            })
            .or_insert_with(|| LineProfile {
                line_user_id: profile.line_user_id.clone(),
                display_name: profile.display_name.clone(),
                picture_url: profile.picture_url.clone(),
                customer_id: None,
                email: profile.email.clone(),
                metadata: serde_json::json!({}),
                created_at: now,
                updated_at: now,
            });
        Ok(record.clone())
    }

    async fn set_customer_id(
        &self,
        line_user_id: &str,
        customer_id: &CustomerId,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        let profile = tables
            .line_profiles
            .get_mut(line_user_id)
            .ok_or(RepositoryError::NotFound)?;
        profile.customer_id = Some(customer_id.clone());
        Ok(())
    }

    async fn set_email(&self, line_user_id: &str, email: &Email) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        let profile = tables
            .line_profiles
            .get_mut(line_user_id)
            .ok_or(RepositoryError::NotFound)?;
        profile.email = Some(email.clone());
        Ok(())
    }
}

#[async_trait]
impl PasskeyRepository for MemoryStore {
    async fn create(
        &self,
        credential: NewPasskeyCredential,
    ) -> Result<PasskeyCredential, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let credential_id = WebAuthnCredentialId::from(credential.passkey.cred_id().as_ref());
        if tables.passkeys.iter().any(|p| p.credential_id == credential_id) {
            return Err(RepositoryError::Conflict("passkey already exists".to_owned()));
        }
        let record = PasskeyCredential {
            id: PasskeyRowId::new(next_id(tables.passkeys.len())),
            credential_id,
            owner: credential.owner,
            email: credential.email,
            passkey: credential.passkey,
            sign_count: 0,
            rp_id: credential.rp_id,
            transports: credential.transports,
            device_name: credential.device_name,
            is_active: true,
            created_at: Utc::now(),
            last_used_at: None,
        };
        tables.passkeys.push(record.clone());
        Ok(record)
    }

    async fn list_active_by_owner(
        &self,
        owner: &CredentialOwner,
    ) -> Result<Vec<PasskeyCredential>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .passkeys
            .iter()
            .filter(|p| p.is_active && &p.owner == owner)
            .cloned()
            .collect())
    }

    async fn list_active_by_email(
        &self,
        email: &Email,
    ) -> Result<Vec<PasskeyCredential>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .passkeys
            .iter()
            .filter(|p| p.is_active && p.email.as_ref() == Some(email))
            .cloned()
            .collect())
    }

    async fn get_active(
        &self,
        credential_id: &WebAuthnCredentialId,
    ) -> Result<Option<PasskeyCredential>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .passkeys
            .iter()
            .find(|p| p.is_active && &p.credential_id == credential_id)
            .cloned())
    }

    async fn advance_counter(
        &self,
        credential_id: &WebAuthnCredentialId,
        new_count: u32,
        passkey: &Passkey,
        used_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let Some(record) = tables
            .passkeys
            .iter_mut()
            .find(|p| p.is_active && &p.credential_id == credential_id)
        else {
            return Ok(false);
        };
        if !counter_advances(record.sign_count, new_count) {
            return Ok(false);
        }
        record.sign_count = new_count;
        record.passkey = passkey.clone();
        record.last_used_at = Some(used_at);
        Ok(true)
    }

    async fn deactivate(
        &self,
        owner: &CredentialOwner,
        id: PasskeyRowId,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let Some(record) = tables
            .passkeys
            .iter_mut()
            .find(|p| p.id == id && &p.owner == owner && p.is_active)
        else {
            return Ok(false);
        };
        record.is_active = false;
        Ok(true)
    }
}

#[async_trait]
impl ChallengeRepository for MemoryStore {
    async fn insert(&self, challenge: PasskeyChallenge) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        tables.challenges.insert(challenge.id, challenge);
        Ok(())
    }

    async fn consume(
        &self,
        id: Uuid,
        ceremony: Ceremony,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<serde_json::Value>, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let matches = tables
            .challenges
            .get(&id)
            .is_some_and(|c| c.ceremony == ceremony && c.scope == scope && c.expires_at > now);
        if !matches {
            return Ok(None);
        }
        Ok(tables.challenges.remove(&id).map(|c| c.state))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let before = tables.challenges.len();
        tables.challenges.retain(|_, c| c.expires_at > now);
        Ok(u64::try_from(before - tables.challenges.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn new_code(subject: &str, created_at: DateTime<Utc>) -> NewVerificationCode {
        NewVerificationCode {
            subject: subject.to_owned(),
            code: "123456".to_owned(),
            purpose: CodePurpose::Register,
            created_at,
            expires_at: created_at + Duration::minutes(10),
            max_attempts: 2,
        }
    }

    #[tokio::test]
    async fn test_failed_attempts_stop_at_max() {
        let store = MemoryStore::new();
        let code = VerificationCodeRepository::insert(&store, new_code("a@b.co", Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.record_failed_attempt(code.id).await.unwrap(), Some(1));
        assert_eq!(store.record_failed_attempt(code.id).await.unwrap(), Some(2));
        assert_eq!(store.record_failed_attempt(code.id).await.unwrap(), None);
        assert!(!store.mark_used(code.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_used_is_single_shot() {
        let store = MemoryStore::new();
        let code = VerificationCodeRepository::insert(&store, new_code("a@b.co", Utc::now()))
            .await
            .unwrap();

        assert!(store.mark_used(code.id).await.unwrap());
        assert!(!store.mark_used(code.id).await.unwrap());
        assert_eq!(store.record_failed_attempt(code.id).await.unwrap(), None);
        assert!(
            store
                .latest_unused("a@b.co", CodePurpose::Register)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_latest_prefers_newest() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        VerificationCodeRepository::insert(&store, new_code("a@b.co", t0))
            .await
            .unwrap();
        let newer = VerificationCodeRepository::insert(
            &store,
            new_code("a@b.co", t0 + Duration::seconds(90)),
        )
        .await
        .unwrap();

        let latest = store
            .latest("a@b.co", CodePurpose::Register)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, newer.id);
    }

    #[tokio::test]
    async fn test_challenge_consumed_once_and_scoped() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let id = Uuid::new_v4();
        ChallengeRepository::insert(
            &store,
            PasskeyChallenge {
                id,
                ceremony: Ceremony::Authentication,
                scope: "signin:a@b.co".to_owned(),
                state: serde_json::json!({"s": 1}),
                created_at: now,
                expires_at: now + Duration::minutes(5),
            },
        )
        .await
        .unwrap();

        let wrong_scope = store
            .consume(id, Ceremony::Authentication, "signin:x@y.co", now)
            .await
            .unwrap();
        assert!(wrong_scope.is_none());

        let wrong_ceremony = store
            .consume(id, Ceremony::Registration, "signin:a@b.co", now)
            .await
            .unwrap();
        assert!(wrong_ceremony.is_none());

        let first = store
            .consume(id, Ceremony::Authentication, "signin:a@b.co", now)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .consume(id, Ceremony::Authentication, "signin:a@b.co", now)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_expired_challenge_rejected_and_purged() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let id = Uuid::new_v4();
        ChallengeRepository::insert(
            &store,
            PasskeyChallenge {
                id,
                ceremony: Ceremony::Registration,
                scope: "email:1".to_owned(),
                state: serde_json::json!({}),
                created_at: now - Duration::minutes(6),
                expires_at: now - Duration::minutes(1),
            },
        )
        .await
        .unwrap();

        assert!(
            store
                .consume(id, Ceremony::Registration, "email:1", now)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        let user = NewEmailUser {
            email: Email::parse("dup@example.com").unwrap(),
            password_hash: "hash".to_owned(),
            name: "Dup".to_owned(),
            phone: None,
        };
        EmailUserRepository::create(&store, user.clone()).await.unwrap();
        let err = EmailUserRepository::create(&store, user).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(store.email_user_count().await, 1);
    }
}
