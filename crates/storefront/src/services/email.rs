//! Email delivery for verification codes.
//!
//! Uses SMTP via lettre for delivery with Askama text and HTML templates,
//! one pair per code purpose.

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;
use tokio::sync::Mutex;

use hinata_core::{CodePurpose, Email};

use crate::config::EmailConfig;
use crate::services::verification::IssuedCode;

#[derive(Template)]
#[template(path = "email/register.html")]
struct RegisterEmailHtml<'a> {
    code: &'a str,
    minutes: i64,
}

#[derive(Template)]
#[template(path = "email/register.txt")]
struct RegisterEmailText<'a> {
    code: &'a str,
    minutes: i64,
}

#[derive(Template)]
#[template(path = "email/reset_password.html")]
struct ResetPasswordEmailHtml<'a> {
    code: &'a str,
    minutes: i64,
}

#[derive(Template)]
#[template(path = "email/reset_password.txt")]
struct ResetPasswordEmailText<'a> {
    code: &'a str,
    minutes: i64,
}

#[derive(Template)]
#[template(path = "email/bind_email.html")]
struct BindEmailHtml<'a> {
    code: &'a str,
    minutes: i64,
}

#[derive(Template)]
#[template(path = "email/bind_email.txt")]
struct BindEmailText<'a> {
    code: &'a str,
    minutes: i64,
}

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// Something that can deliver a verification code.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification_code(
        &self,
        to: &Email,
        purpose: CodePurpose,
        code: &str,
        valid_minutes: i64,
    ) -> Result<(), EmailError>;
}

/// Subject line and rendered (text, html) bodies for a code email.
fn render_code_email(
    purpose: CodePurpose,
    code: &str,
    minutes: i64,
) -> Result<(&'static str, String, String), EmailError> {
    let rendered = match purpose {
        CodePurpose::Register => (
            "Confirm your Hinata account",
            RegisterEmailText { code, minutes }.render()?,
            RegisterEmailHtml { code, minutes }.render()?,
        ),
        CodePurpose::ResetPassword => (
            "Reset your Hinata password",
            ResetPasswordEmailText { code, minutes }.render()?,
            ResetPasswordEmailHtml { code, minutes }.render()?,
        ),
        CodePurpose::BindEmail => (
            "Link your email to Hinata",
            BindEmailText { code, minutes }.render()?,
            BindEmailHtml { code, minutes }.render()?,
        ),
    };
    Ok(rendered)
}

/// SMTP email sender.
#[derive(Clone)]
pub struct SmtpEmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpEmailSender {
    /// Create a new sender from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }

    /// Send a multipart email with both plain text and HTML versions.
    async fn send_multipart_email(
        &self,
        to: &str,
        subject: &str,
        text_body: String,
        html_body: String,
    ) -> Result<(), EmailError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| EmailError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        self.mailer.send(email).await?;

        tracing::info!(to = %to, subject = %subject, "Email sent successfully");
        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_verification_code(
        &self,
        to: &Email,
        purpose: CodePurpose,
        code: &str,
        valid_minutes: i64,
    ) -> Result<(), EmailError> {
        let (subject, text, html) = render_code_email(purpose, code, valid_minutes)?;
        self.send_multipart_email(to.as_str(), subject, text, html)
            .await
    }
}

/// A delivered code, as captured by [`MemoryOutbox`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCode {
    pub to: String,
    pub purpose: CodePurpose,
    pub code: String,
}

/// Sender that keeps messages in memory instead of sending them.
#[derive(Default)]
pub struct MemoryOutbox {
    sent: Mutex<Vec<SentCode>>,
}

impl MemoryOutbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last code sent to `to` for `purpose`.
    pub async fn last_code(&self, to: &str, purpose: CodePurpose) -> Option<String> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|m| m.to == to && m.purpose == purpose)
            .map(|m| m.code.clone())
    }

    pub async fn sent(&self) -> Vec<SentCode> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailSender for MemoryOutbox {
    async fn send_verification_code(
        &self,
        to: &Email,
        purpose: CodePurpose,
        code: &str,
        valid_minutes: i64,
    ) -> Result<(), EmailError> {
        // Render anyway so template errors surface in tests.
        render_code_email(purpose, code, valid_minutes)?;
        self.sent.lock().await.push(SentCode {
            to: to.to_string(),
            purpose,
            code: code.to_owned(),
        });
        Ok(())
    }
}

/// Deliver an issued code, never failing the caller.
///
/// Returns whether the code actually went out. Failures are logged; the
/// code stays valid either way.
pub async fn deliver_code(
    sender: Option<&dyn EmailSender>,
    to: &Email,
    purpose: CodePurpose,
    issued: &IssuedCode,
    valid_minutes: i64,
) -> bool {
    let Some(sender) = sender else {
        tracing::warn!(%purpose, "email delivery not configured, code not sent");
        return false;
    };

    match sender
        .send_verification_code(to, purpose, &issued.code, valid_minutes)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, %purpose, "failed to deliver verification code");
            false
        }
    }
}
