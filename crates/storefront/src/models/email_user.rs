//! Email/password identity records.

use chrono::{DateTime, Utc};
use serde::Serialize;

use hinata_core::{CustomerId, Email, EmailUserId};

/// A storefront member who signed up with email and password.
///
/// Separate from the commerce backend's customer record; `customer_id`
/// links the two once the account is verified or merged.
#[derive(Debug, Clone)]
pub struct EmailUser {
    /// Unique user ID.
    pub id: EmailUserId,
    /// Normalised email address (unique).
    pub email: Email,
    /// Argon2 PHC string. Empty when the account came from a linked social login.
    pub password_hash: String,
    /// Display name.
    pub name: String,
    /// Optional phone number.
    pub phone: Option<String>,
    /// Whether the email has been verified with a code.
    pub email_verified: bool,
    /// When the email was verified.
    pub email_verified_at: Option<DateTime<Utc>>,
    /// Linked commerce customer.
    pub customer_id: Option<CustomerId>,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
    /// When the user was last updated.
    pub updated_at: DateTime<Utc>,
}

impl EmailUser {
    /// Whether this account can log in with a password at all.
    #[must_use]
    pub fn has_password(&self) -> bool {
        !self.password_hash.is_empty()
    }

    /// Public view returned by the auth endpoints.
    #[must_use]
    pub fn summary(&self) -> EmailUserSummary {
        EmailUserSummary {
            id: self.id,
            email: self.email.to_string(),
            name: self.name.clone(),
            customer_id: self.customer_id.clone(),
        }
    }
}

/// Data for inserting a new unverified user.
#[derive(Debug, Clone)]
pub struct NewEmailUser {
    pub email: Email,
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
}

/// `{id, email, name, customer_id}` as sent to the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmailUserSummary {
    pub id: EmailUserId,
    pub email: String,
    pub name: String,
    pub customer_id: Option<CustomerId>,
}
