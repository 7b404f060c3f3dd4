//! Authentication service.
//!
//! Orchestrates the email/password flows (register, verify, login, resend,
//! forgot/reset password, email bind for LINE members) and the LINE sign-in,
//! on top of the verification code manager, the identity repositories, email
//! delivery and the commerce backend. Every successful flow ends in a
//! [`SessionPayload`]; writing it to a cookie is the caller's job.
//!
//! Identity states: anonymous, registered (unverified), verified, linked to
//! a commerce customer. Linking goes through
//! [`resolve_customer`].

mod error;
mod password;

pub use error::AuthError;

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use hinata_core::{AuthMethod, CodePurpose, CustomerId, Email};

use crate::commerce::{CommerceBackend, NewCustomer};
use crate::config::Environment;
use crate::db::{RepositoryError, Repositories};
use crate::line::LineIdentity;
use crate::models::{EmailUser, LineProfile, LineProfileUpsert, NewEmailUser, SessionPayload};
use crate::services::email::{EmailSender, deliver_code};
use crate::services::linking::{
    LinkDecision, LinkResolution, PartialIdentity, resolve_customer,
};
use crate::services::verification::{IssuedCode, VerificationCodeManager, VerificationError};

use password::{hash_password, normalize_phone, validate_name, validate_password, verify_password};

/// Registration form, as submitted.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
    pub phone: Option<String>,
}

/// Result of a flow that issued a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeIssued {
    pub email: Email,
    /// The raw code, only when running in development and delivery did not
    /// happen.
    pub dev_code: Option<String>,
}

/// A completed email sign-in.
#[derive(Debug, Clone)]
pub struct EmailSignIn {
    pub user: EmailUser,
    pub session: SessionPayload,
}

/// Authentication service.
#[derive(Clone)]
pub struct AuthService {
    repos: Repositories,
    codes: VerificationCodeManager,
    mailer: Option<Arc<dyn EmailSender>>,
    commerce: Arc<dyn CommerceBackend>,
    environment: Environment,
}

impl AuthService {
    #[must_use]
    pub fn new(
        repos: Repositories,
        codes: VerificationCodeManager,
        mailer: Option<Arc<dyn EmailSender>>,
        commerce: Arc<dyn CommerceBackend>,
        environment: Environment,
    ) -> Self {
        Self {
            repos,
            codes,
            mailer,
            commerce,
            environment,
        }
    }

    // =========================================================================
    // Email/password
    // =========================================================================

    /// Register with email and password and send a verification code.
    ///
    /// Registering again before verifying refreshes the stored password and
    /// name and issues a fresh code instead of creating a second user.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation`/`InvalidEmail` before anything is stored,
    /// `AuthError::AlreadyRegistered` for a verified email, and
    /// `AuthError::Verification` if a code was issued too recently. A
    /// request refused by the cooldown leaves the stored user untouched.
    #[instrument(skip(self, form), fields(email = %form.email))]
    pub async fn register(&self, form: Registration) -> Result<CodeIssued, AuthError> {
        let email = Email::parse(&form.email)?;
        validate_password(&form.password)?;
        let name = validate_name(&form.name)?;
        let phone = normalize_phone(form.phone.as_deref())?;

        let existing = self.repos.email_users.get_by_email(&email).await?;
        if existing.as_ref().is_some_and(|user| user.email_verified) {
            return Err(AuthError::AlreadyRegistered);
        }
        // Nothing is written while a fresh code could not be sent.
        self.codes
            .ensure_can_issue(email.as_str(), CodePurpose::Register)
            .await?;

        let password_hash = hash_password(&form.password)?;

        match existing {
            Some(existing) => {
                self.repos
                    .email_users
                    .refresh_unverified(existing.id, &password_hash, &name, phone.as_deref())
                    .await?
                    .ok_or(AuthError::AlreadyRegistered)?;
                tracing::info!(user_id = %existing.id, "re-registration of unverified email");
            }
            None => {
                let user = self
                    .repos
                    .email_users
                    .create(NewEmailUser {
                        email: email.clone(),
                        password_hash,
                        name,
                        phone,
                    })
                    .await
                    .map_err(|e| match e {
                        RepositoryError::Conflict(_) => AuthError::AlreadyRegistered,
                        other => AuthError::Repository(other),
                    })?;
                tracing::info!(user_id = %user.id, "email user registered");
            }
        }

        let issued = self.codes.issue(email.as_str(), CodePurpose::Register).await?;
        let dev_code = self
            .send_code(&email, CodePurpose::Register, &issued)
            .await;
        Ok(CodeIssued { email, dev_code })
    }

    /// Verify the registration code, mark the email verified and link the
    /// account to a commerce customer.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Verification` for a missing, expired, exhausted or
    /// wrong code.
    #[instrument(skip(self, email, code), fields(email = %email))]
    pub async fn verify_email(&self, email: &str, code: &str) -> Result<EmailSignIn, AuthError> {
        let email = Email::parse(email)?;

        self.codes
            .verify(email.as_str(), CodePurpose::Register, code)
            .await?;

        let user = self
            .repos
            .email_users
            .get_by_email(&email)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let user = self.repos.email_users.mark_verified(user.id, Utc::now()).await?;

        tracing::info!(user_id = %user.id, "email verified");
        self.sign_in_email_user(user, AuthMethod::Email).await
    }

    /// Log in with email and password.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` for an unknown email, a
    /// password-less account or a wrong password, and
    /// `AuthError::NeedsVerification` if the password is right but the email
    /// was never verified.
    #[instrument(skip(self, email, password), fields(email = %email))]
    pub async fn login(&self, email: &str, password: &str) -> Result<EmailSignIn, AuthError> {
        let email = Email::parse(email).map_err(|_| AuthError::InvalidCredentials)?;

        let user = self
            .repos
            .email_users
            .get_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.has_password() {
            return Err(AuthError::InvalidCredentials);
        }
        verify_password(password, &user.password_hash)?;

        if !user.email_verified {
            return Err(AuthError::NeedsVerification);
        }

        self.sign_in_email_user(user, AuthMethod::Email).await
    }

    /// Send another code for `purpose`.
    ///
    /// Answers the same way whether or not the email is known, and swallows
    /// the resend cooldown. `bind_email` needs a LINE session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidPurpose` for an unknown purpose and
    /// `AuthError::LineSessionRequired` for `bind_email` without one.
    #[instrument(skip(self, email, line_session), fields(email = %email))]
    pub async fn resend_code(
        &self,
        email: &str,
        purpose: &str,
        line_session: Option<&SessionPayload>,
    ) -> Result<CodeIssued, AuthError> {
        let purpose: CodePurpose = purpose.parse()?;
        let email = Email::parse(email)?;

        let eligible = match purpose {
            CodePurpose::Register => self
                .repos
                .email_users
                .get_by_email(&email)
                .await?
                .is_some_and(|u| !u.email_verified),
            CodePurpose::ResetPassword => {
                self.repos.email_users.get_by_email(&email).await?.is_some()
            }
            CodePurpose::BindEmail => {
                if line_session.and_then(|s| s.line_user_id.as_ref()).is_none() {
                    return Err(AuthError::LineSessionRequired);
                }
                true
            }
        };

        if !eligible {
            tracing::info!(%purpose, "resend requested for ineligible email, ignoring");
            return Ok(CodeIssued {
                email,
                dev_code: None,
            });
        }

        let dev_code = self.issue_quietly(&email, purpose).await?;
        Ok(CodeIssued {
            email,
            dev_code: dev_code.filter(|_| purpose != CodePurpose::ResetPassword),
        })
    }

    /// Start a password reset. Always succeeds for a well-formed email.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` for a malformed address and
    /// `AuthError::Repository` if the lookup fails.
    #[instrument(skip(self, email), fields(email = %email))]
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let email = Email::parse(email)?;

        if self.repos.email_users.get_by_email(&email).await?.is_some() {
            self.issue_quietly(&email, CodePurpose::ResetPassword).await?;
        } else {
            tracing::info!("password reset for unknown email, ignoring");
        }
        Ok(())
    }

    /// Set a new password with a reset code.
    ///
    /// The reset code proves control of the mailbox, so an unverified account
    /// becomes verified too.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` for a weak password (checked before the
    /// code is consumed) and `AuthError::Verification` for a bad code.
    #[instrument(skip(self, email, code, new_password), fields(email = %email))]
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let email = Email::parse(email)?;
        validate_password(new_password)?;
        let password_hash = hash_password(new_password)?;

        self.codes
            .verify(email.as_str(), CodePurpose::ResetPassword, code)
            .await?;

        let user = self
            .repos
            .email_users
            .get_by_email(&email)
            .await?
            .ok_or(AuthError::Verification(VerificationError::NotFound))?;

        self.repos
            .email_users
            .update_password(user.id, &password_hash)
            .await?;
        if !user.email_verified {
            self.repos.email_users.mark_verified(user.id, Utc::now()).await?;
        }

        tracing::info!(user_id = %user.id, "password reset");
        Ok(())
    }

    /// Send a code to attach `email` to the LINE profile in `session`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::LineSessionRequired` without a LINE session,
    /// `AuthError::EmailAlreadyBound` if another LINE profile holds the email,
    /// and `AuthError::Verification` inside the resend cooldown.
    #[instrument(skip(self, session, email), fields(email = %email))]
    pub async fn bind_email(
        &self,
        session: &SessionPayload,
        email: &str,
    ) -> Result<CodeIssued, AuthError> {
        let line_user_id = session
            .line_user_id
            .as_deref()
            .ok_or(AuthError::LineSessionRequired)?;
        let email = Email::parse(email)?;

        self.ensure_email_bindable(&email, line_user_id).await?;

        let issued = self.codes.issue(email.as_str(), CodePurpose::BindEmail).await?;
        let dev_code = self
            .send_code(&email, CodePurpose::BindEmail, &issued)
            .await;
        Ok(CodeIssued { email, dev_code })
    }

    /// Confirm an email bind and return the refreshed session.
    ///
    /// The LINE profile gets the email, then the LINE profile and any email
    /// user with that address are linked to one customer.
    ///
    /// # Errors
    ///
    /// Same as [`Self::bind_email`], plus `AuthError::Verification` for a bad
    /// code.
    #[instrument(skip(self, session, email, code), fields(email = %email))]
    pub async fn verify_bind(
        &self,
        session: &SessionPayload,
        email: &str,
        code: &str,
    ) -> Result<SessionPayload, AuthError> {
        let line_user_id = session
            .line_user_id
            .as_deref()
            .ok_or(AuthError::LineSessionRequired)?;
        let email = Email::parse(email)?;

        self.ensure_email_bindable(&email, line_user_id).await?;

        self.codes
            .verify(email.as_str(), CodePurpose::BindEmail, code)
            .await?;

        self.repos
            .line_profiles
            .set_email(line_user_id, &email)
            .await?;
        let mut profile = self
            .repos
            .line_profiles
            .get(line_user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let mut email_user = self.repos.email_users.get_by_email(&email).await?;

        let customer_id = self
            .link_or_defer(email_user.as_ref(), Some(&profile), &profile.display_name)
            .await;
        if let Some(user) = email_user.as_mut() {
            user.customer_id.clone_from(&customer_id);
        }
        profile.customer_id = customer_id;

        tracing::info!(line_user_id, "email bound to LINE profile");
        Ok(line_session(&profile, email_user.as_ref()))
    }

    // =========================================================================
    // LINE
    // =========================================================================

    /// Record a LINE sign-in and build its session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Repository` if the profile cannot be stored.
    #[instrument(skip(self, identity), fields(line_user_id = %identity.profile.user_id))]
    pub async fn sign_in_line(&self, identity: LineIdentity) -> Result<SessionPayload, AuthError> {
        let email = identity
            .email
            .as_deref()
            .and_then(|e| Email::parse(e).ok());

        let mut profile = self
            .repos
            .line_profiles
            .upsert(LineProfileUpsert {
                line_user_id: identity.profile.user_id,
                display_name: identity.profile.display_name,
                picture_url: identity.profile.picture_url,
                email,
            })
            .await?;

        let mut email_user = match &profile.email {
            Some(email) => self.repos.email_users.get_by_email(email).await?,
            None => None,
        };
        // Only a verified email account may be merged into.
        if email_user.as_ref().is_some_and(|u| !u.email_verified) {
            email_user = None;
        }

        let customer_id = self
            .link_or_defer(email_user.as_ref(), Some(&profile), &profile.display_name)
            .await;
        if let Some(user) = email_user.as_mut() {
            user.customer_id.clone_from(&customer_id);
        }
        profile.customer_id = customer_id;

        Ok(line_session(&profile, email_user.as_ref()))
    }

    // =========================================================================
    // Shared
    // =========================================================================

    /// Link a verified email user and build its session.
    async fn sign_in_email_user(
        &self,
        mut user: EmailUser,
        method: AuthMethod,
    ) -> Result<EmailSignIn, AuthError> {
        let line = self.repos.line_profiles.get_by_email(&user.email).await?;

        if user.customer_id.is_none()
            || line.as_ref().is_some_and(|l| l.customer_id != user.customer_id)
        {
            let name = user.name.clone();
            user.customer_id = self.link_or_defer(Some(&user), line.as_ref(), &name).await;
        }

        let session = email_session(&user, method, line.as_ref());
        Ok(EmailSignIn { user, session })
    }

    /// [`Self::link_identities`], logging failures instead of returning them.
    ///
    /// A commerce outage must not block sign-in: the session goes out
    /// without a customer and linking is retried at the next sign-in.
    async fn link_or_defer(
        &self,
        email_user: Option<&EmailUser>,
        line: Option<&LineProfile>,
        display_name: &str,
    ) -> Option<CustomerId> {
        match self.link_identities(email_user, line, display_name).await {
            Ok(customer_id) => Some(customer_id),
            Err(e) => {
                tracing::error!(error = %e, "account linking failed, deferring to next sign-in");
                email_user
                    .and_then(|u| u.customer_id.clone())
                    .or_else(|| line.and_then(|l| l.customer_id.clone()))
            }
        }
    }

    /// Resolve one customer for the given identities, provisioning it in the
    /// commerce backend if neither has one, and persist it on the side(s)
    /// that lacked it.
    async fn link_identities(
        &self,
        email_user: Option<&EmailUser>,
        line: Option<&LineProfile>,
        display_name: &str,
    ) -> Result<CustomerId, AuthError> {
        let email_side = email_user
            .map(|u| PartialIdentity::email(Some(u.email.to_string()), u.customer_id.clone()));
        let line_side = line.map(|l| {
            PartialIdentity::line(l.email.as_ref().map(ToString::to_string), l.customer_id.clone())
        });

        let resolution = resolve_customer(email_side.as_ref(), line_side.as_ref());
        log_resolution(&resolution);

        let customer_id = match resolution.customer_id.clone() {
            Some(id) => id,
            None => {
                let email = email_user
                    .map(|u| u.email.to_string())
                    .or_else(|| line.and_then(|l| l.email.as_ref().map(ToString::to_string)));
                self.commerce
                    .create_customer(&NewCustomer {
                        email,
                        name: display_name.to_owned(),
                        phone: email_user.and_then(|u| u.phone.clone()),
                        line_user_id: line.map(|l| l.line_user_id.clone()),
                    })
                    .await?
            }
        };

        let provisioned = resolution.decision == LinkDecision::NeedsProvisioning;
        if let Some(user) = email_user
            && (provisioned || resolution.updates_email_side())
        {
            self.repos
                .email_users
                .set_customer_id(user.id, &customer_id)
                .await?;
        }
        if let Some(profile) = line
            && (provisioned || resolution.updates_line_side())
        {
            self.repos
                .line_profiles
                .set_customer_id(&profile.line_user_id, &customer_id)
                .await?;
        }

        Ok(customer_id)
    }

    async fn ensure_email_bindable(&self, email: &Email, line_user_id: &str) -> Result<(), AuthError> {
        if let Some(holder) = self.repos.line_profiles.get_by_email(email).await?
            && holder.line_user_id != line_user_id
        {
            return Err(AuthError::EmailAlreadyBound);
        }
        Ok(())
    }

    /// Issue and deliver a code, treating the resend cooldown as success.
    async fn issue_quietly(
        &self,
        email: &Email,
        purpose: CodePurpose,
    ) -> Result<Option<String>, AuthError> {
        match self.codes.issue(email.as_str(), purpose).await {
            Ok(issued) => Ok(self.send_code(email, purpose, &issued).await),
            Err(VerificationError::RateLimited { retry_after_secs }) => {
                tracing::info!(%purpose, retry_after_secs, "code requested inside cooldown, ignoring");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deliver a code. Returns it for the response only in development when
    /// delivery did not happen.
    async fn send_code(
        &self,
        email: &Email,
        purpose: CodePurpose,
        issued: &IssuedCode,
    ) -> Option<String> {
        let minutes = self.codes.policy().ttl_seconds / 60;
        let delivered = deliver_code(self.mailer.as_deref(), email, purpose, issued, minutes).await;

        if delivered || self.environment != Environment::Development {
            return None;
        }
        tracing::warn!(%purpose, code = %issued.code, "development mode: returning undelivered code");
        Some(issued.code.clone())
    }
}

fn log_resolution(resolution: &LinkResolution) {
    for step in &resolution.log {
        if resolution.decision == LinkDecision::Conflict {
            tracing::warn!(decision = ?resolution.decision, "{step}");
        } else {
            tracing::info!(decision = ?resolution.decision, "{step}");
        }
    }
}

/// Session for an email user, enriched with a linked LINE profile if any.
#[must_use]
pub fn email_session(
    user: &EmailUser,
    method: AuthMethod,
    line: Option<&LineProfile>,
) -> SessionPayload {
    let mut session = SessionPayload::new(user.name.clone(), method);
    session.customer_id.clone_from(&user.customer_id);
    session.email = Some(user.email.to_string());
    session.email_user_id = Some(user.id);
    if let Some(line) = line {
        session.picture_url.clone_from(&line.picture_url);
        session.line_user_id = Some(line.line_user_id.clone());
    }
    session
}

/// Session for a LINE profile, enriched with a linked email user if any.
#[must_use]
pub fn line_session(profile: &LineProfile, email_user: Option<&EmailUser>) -> SessionPayload {
    let mut session = SessionPayload::new(profile.display_name.clone(), AuthMethod::Line);
    session.picture_url.clone_from(&profile.picture_url);
    session.customer_id = profile
        .customer_id
        .clone()
        .or_else(|| email_user.and_then(|u| u.customer_id.clone()));
    session.email = profile
        .email
        .as_ref()
        .map(ToString::to_string)
        .or_else(|| email_user.map(|u| u.email.to_string()));
    session.line_user_id = Some(profile.line_user_id.clone());
    session.email_user_id = email_user.map(|u| u.id);
    session
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::commerce::InMemoryCommerce;
    use crate::config::OtpConfig;
    use crate::db::{EmailUserRepository, LineProfileRepository, MemoryStore};
    use crate::line::LineProfileInfo;
    use crate::services::email::MemoryOutbox;

    struct Harness {
        store: Arc<MemoryStore>,
        outbox: Arc<MemoryOutbox>,
        commerce: Arc<InMemoryCommerce>,
        auth: AuthService,
    }

    fn harness_with(environment: Environment, with_mailer: bool) -> Harness {
        harness_with_policy(environment, with_mailer, OtpConfig::default())
    }

    fn harness_with_policy(environment: Environment, with_mailer: bool, policy: OtpConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let repos = Repositories::from_store(&store);
        let outbox = Arc::new(MemoryOutbox::new());
        let commerce = Arc::new(InMemoryCommerce::new());
        let codes = VerificationCodeManager::new(repos.verification_codes.clone(), policy);
        let mailer: Option<Arc<dyn EmailSender>> = if with_mailer {
            Some(outbox.clone())
        } else {
            None
        };
        let auth = AuthService::new(repos, codes, mailer, commerce.clone(), environment);
        Harness {
            store,
            outbox,
            commerce,
            auth,
        }
    }

    fn harness() -> Harness {
        harness_with(Environment::Production, true)
    }

    fn form(email: &str) -> Registration {
        Registration {
            email: email.to_owned(),
            password: "hunter2hunter2".to_owned(),
            name: "Aki".to_owned(),
            phone: None,
        }
    }

    async fn register_and_verify(h: &Harness, email: &str) -> EmailSignIn {
        h.auth.register(form(email)).await.unwrap();
        let code = h.outbox.last_code(email, CodePurpose::Register).await.unwrap();
        h.auth.verify_email(email, &code).await.unwrap()
    }

    fn line_identity(user_id: &str, email: Option<&str>) -> LineIdentity {
        LineIdentity {
            profile: LineProfileInfo {
                user_id: user_id.to_owned(),
                display_name: "Ren".to_owned(),
                picture_url: Some("https://profile.line-scdn.net/ren".to_owned()),
            },
            email: email.map(ToOwned::to_owned),
        }
    }

    #[tokio::test]
    async fn test_register_validates_before_storing() {
        let h = harness();
        let mut bad = form("aki@example.com");
        bad.password = "short".to_owned();

        assert!(matches!(
            h.auth.register(bad).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            h.auth.register(form("not-an-email")).await,
            Err(AuthError::InvalidEmail(_))
        ));
        assert_eq!(h.store.email_user_count().await, 0);
    }

    #[tokio::test]
    async fn test_reregistering_unverified_email_reuses_user() {
        let h = harness();
        h.auth.register(form("aki@example.com")).await.unwrap();

        // Second attempt lands inside the resend cooldown.
        let again = h.auth.register(form("aki@example.com")).await;
        assert!(matches!(
            again,
            Err(AuthError::Verification(VerificationError::RateLimited { .. }))
        ));
        assert_eq!(h.store.email_user_count().await, 1);
        assert_eq!(
            h.store.code_count("aki@example.com", CodePurpose::Register).await,
            1
        );
    }

    #[tokio::test]
    async fn test_reregistering_inside_cooldown_keeps_stored_user() {
        let h = harness();
        h.auth.register(form("aki@example.com")).await.unwrap();

        let mut takeover = form("aki@example.com");
        takeover.password = "mallory-password".to_owned();
        takeover.name = "Mallory".to_owned();
        assert!(matches!(
            h.auth.register(takeover).await,
            Err(AuthError::Verification(VerificationError::RateLimited { .. }))
        ));

        let stored =
            EmailUserRepository::get_by_email(&*h.store, &Email::parse("aki@example.com").unwrap())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(stored.name, "Aki");

        let code = h
            .outbox
            .last_code("aki@example.com", CodePurpose::Register)
            .await
            .unwrap();
        h.auth.verify_email("aki@example.com", &code).await.unwrap();
        assert!(matches!(
            h.auth.login("aki@example.com", "mallory-password").await,
            Err(AuthError::InvalidCredentials)
        ));
        h.auth.login("aki@example.com", "hunter2hunter2").await.unwrap();
    }

    #[tokio::test]
    async fn test_reregistering_after_cooldown_issues_fresh_code() {
        let h = harness_with_policy(
            Environment::Production,
            true,
            OtpConfig {
                resend_cooldown_seconds: 0,
                ..OtpConfig::default()
            },
        );
        h.auth.register(form("aki@example.com")).await.unwrap();
        let first = h
            .outbox
            .last_code("aki@example.com", CodePurpose::Register)
            .await
            .unwrap();

        let mut again = form("aki@example.com");
        again.password = "second-password".to_owned();
        again.name = "Aki Tanaka".to_owned();
        h.auth.register(again).await.unwrap();

        assert_eq!(h.store.email_user_count().await, 1);
        assert_eq!(
            h.store.code_count("aki@example.com", CodePurpose::Register).await,
            2
        );
        let latest = h
            .outbox
            .last_code("aki@example.com", CodePurpose::Register)
            .await
            .unwrap();
        if latest != first {
            assert!(matches!(
                h.auth.verify_email("aki@example.com", &first).await,
                Err(AuthError::Verification(_))
            ));
        }
        let sign_in = h.auth.verify_email("aki@example.com", &latest).await.unwrap();
        assert_eq!(sign_in.user.name, "Aki Tanaka");
        h.auth.login("aki@example.com", "second-password").await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_links_new_customer_and_blocks_reregistration() {
        let h = harness();
        let sign_in = register_and_verify(&h, "aki@example.com").await;

        assert!(sign_in.user.email_verified);
        let customer = sign_in.session.customer_id.clone().unwrap();
        assert_eq!(
            h.commerce.customer_by_email("aki@example.com").await,
            Some(customer.clone())
        );
        let stored =
            EmailUserRepository::get_by_email(&*h.store, &Email::parse("aki@example.com").unwrap())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(stored.customer_id, Some(customer));
        assert_eq!(sign_in.session.auth_method, AuthMethod::Email);

        assert!(matches!(
            h.auth.register(form("aki@example.com")).await,
            Err(AuthError::AlreadyRegistered)
        ));
    }

    #[tokio::test]
    async fn test_verify_adopts_customer_of_line_profile_with_same_email() {
        let h = harness();
        let line_session = h
            .auth
            .sign_in_line(line_identity("Uline1", Some("aki@example.com")))
            .await
            .unwrap();
        let line_customer = line_session.customer_id.clone().unwrap();

        let sign_in = register_and_verify(&h, "aki@example.com").await;
        assert_eq!(sign_in.session.customer_id, Some(line_customer));
        assert_eq!(sign_in.session.line_user_id.as_deref(), Some("Uline1"));
        assert_eq!(h.commerce.customer_count().await, 1);
    }

    #[tokio::test]
    async fn test_login_requires_verification_and_right_password() {
        let h = harness();
        h.auth.register(form("aki@example.com")).await.unwrap();

        assert!(matches!(
            h.auth.login("aki@example.com", "hunter2hunter2").await,
            Err(AuthError::NeedsVerification)
        ));
        assert!(matches!(
            h.auth.login("aki@example.com", "wrong-password").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            h.auth.login("nobody@example.com", "hunter2hunter2").await,
            Err(AuthError::InvalidCredentials)
        ));

        let code = h
            .outbox
            .last_code("aki@example.com", CodePurpose::Register)
            .await
            .unwrap();
        h.auth.verify_email("aki@example.com", &code).await.unwrap();

        let sign_in = h.auth.login("AKI@example.com", "hunter2hunter2").await.unwrap();
        assert_eq!(sign_in.session.email.as_deref(), Some("aki@example.com"));
    }

    #[tokio::test]
    async fn test_forgot_password_same_result_for_unknown_email() {
        let h = harness();
        register_and_verify(&h, "aki@example.com").await;

        h.auth.forgot_password("aki@example.com").await.unwrap();
        h.auth.forgot_password("nobody@example.com").await.unwrap();
        // Cooldown is swallowed.
        h.auth.forgot_password("aki@example.com").await.unwrap();

        assert_eq!(
            h.store
                .code_count("aki@example.com", CodePurpose::ResetPassword)
                .await,
            1
        );
        assert_eq!(
            h.store
                .code_count("nobody@example.com", CodePurpose::ResetPassword)
                .await,
            0
        );
    }

    #[tokio::test]
    async fn test_reset_password_replaces_password() {
        let h = harness();
        register_and_verify(&h, "aki@example.com").await;
        h.auth.forgot_password("aki@example.com").await.unwrap();
        let code = h
            .outbox
            .last_code("aki@example.com", CodePurpose::ResetPassword)
            .await
            .unwrap();

        assert!(matches!(
            h.auth.reset_password("aki@example.com", &code, "short").await,
            Err(AuthError::Validation(_))
        ));
        h.auth
            .reset_password("aki@example.com", &code, "a-new-password")
            .await
            .unwrap();

        assert!(h.auth.login("aki@example.com", "a-new-password").await.is_ok());
        assert!(h.auth.login("aki@example.com", "hunter2hunter2").await.is_err());
        assert!(matches!(
            h.auth
                .reset_password("aki@example.com", &code, "another-password")
                .await,
            Err(AuthError::Verification(VerificationError::NotFound))
        ));
    }

    #[tokio::test]
    async fn test_resend_rejects_unknown_purpose_and_hides_unknown_email() {
        let h = harness();
        assert!(matches!(
            h.auth.resend_code("aki@example.com", "login", None).await,
            Err(AuthError::InvalidPurpose(_))
        ));

        let outcome = h
            .auth
            .resend_code("nobody@example.com", "register", None)
            .await
            .unwrap();
        assert_eq!(outcome.dev_code, None);
        assert_eq!(
            h.store
                .code_count("nobody@example.com", CodePurpose::Register)
                .await,
            0
        );

        assert!(matches!(
            h.auth.resend_code("aki@example.com", "bind_email", None).await,
            Err(AuthError::LineSessionRequired)
        ));
    }

    #[tokio::test]
    async fn test_dev_code_only_in_development_without_delivery() {
        let dev = harness_with(Environment::Development, false);
        let outcome = dev.auth.register(form("aki@example.com")).await.unwrap();
        assert_eq!(outcome.dev_code.as_ref().map(String::len), Some(6));

        let prod = harness_with(Environment::Production, false);
        let outcome = prod.auth.register(form("aki@example.com")).await.unwrap();
        assert_eq!(outcome.dev_code, None);

        let delivered = harness_with(Environment::Development, true);
        let outcome = delivered.auth.register(form("aki@example.com")).await.unwrap();
        assert_eq!(outcome.dev_code, None);
    }

    #[tokio::test]
    async fn test_line_sign_in_provisions_once() {
        let h = harness();
        let first = h
            .auth
            .sign_in_line(line_identity("Uline1", None))
            .await
            .unwrap();
        let second = h
            .auth
            .sign_in_line(line_identity("Uline1", None))
            .await
            .unwrap();

        assert_eq!(first.auth_method, AuthMethod::Line);
        assert!(first.customer_id.is_some());
        assert_eq!(first.customer_id, second.customer_id);
        assert_eq!(h.commerce.customer_count().await, 1);
    }

    #[tokio::test]
    async fn test_line_sign_in_adopts_verified_email_customer() {
        let h = harness();
        let email_sign_in = register_and_verify(&h, "aki@example.com").await;

        let session = h
            .auth
            .sign_in_line(line_identity("Uline1", Some("aki@example.com")))
            .await
            .unwrap();
        assert_eq!(session.customer_id, email_sign_in.session.customer_id);
        assert_eq!(session.email_user_id, Some(email_sign_in.user.id));
        assert_eq!(
            LineProfileRepository::get(&*h.store, "Uline1")
                .await
                .unwrap()
                .unwrap()
                .customer_id,
            email_sign_in.session.customer_id
        );
    }

    #[tokio::test]
    async fn test_bind_flow_links_line_profile_to_email_customer() {
        let h = harness();
        let email_sign_in = register_and_verify(&h, "aki@example.com").await;
        let line = h
            .auth
            .sign_in_line(line_identity("Uline1", None))
            .await
            .unwrap();

        assert!(matches!(
            h.auth.bind_email(&email_sign_in.session, "aki@example.com").await,
            Err(AuthError::LineSessionRequired)
        ));

        h.auth.bind_email(&line, "aki@example.com").await.unwrap();
        let code = h
            .outbox
            .last_code("aki@example.com", CodePurpose::BindEmail)
            .await
            .unwrap();
        let session = h
            .auth
            .verify_bind(&line, "aki@example.com", &code)
            .await
            .unwrap();

        assert_eq!(session.email.as_deref(), Some("aki@example.com"));
        assert_eq!(session.email_user_id, Some(email_sign_in.user.id));
        // Both identities had their own customer; the email one wins.
        assert_eq!(session.customer_id, email_sign_in.session.customer_id);
        assert_eq!(session.auth_method, AuthMethod::Line);
    }

    #[tokio::test]
    async fn test_bind_rejects_email_held_by_other_line_profile() {
        let h = harness();
        h.auth
            .sign_in_line(line_identity("Uholder", Some("aki@example.com")))
            .await
            .unwrap();
        let other = h
            .auth
            .sign_in_line(line_identity("Uother", None))
            .await
            .unwrap();

        assert!(matches!(
            h.auth.bind_email(&other, "aki@example.com").await,
            Err(AuthError::EmailAlreadyBound)
        ));
    }

    #[test]
    fn test_line_session_falls_back_to_email_user() {
        let now = Utc::now();
        let profile = LineProfile {
            line_user_id: "U1".to_owned(),
            display_name: "Ren".to_owned(),
            picture_url: None,
            customer_id: None,
            email: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        let user = EmailUser {
            id: hinata_core::EmailUserId::new(7),
            email: Email::parse("ren@example.com").unwrap(),
            password_hash: String::new(),
            name: "Ren".to_owned(),
            phone: None,
            email_verified: true,
            email_verified_at: Some(now),
            customer_id: CustomerId::new("cus_7"),
            created_at: now,
            updated_at: now,
        };

        let session = line_session(&profile, Some(&user));
        assert_eq!(session.customer_id, CustomerId::new("cus_7"));
        assert_eq!(session.email.as_deref(), Some("ren@example.com"));
        assert_eq!(session.email_user_id, Some(user.id));
    }
}
