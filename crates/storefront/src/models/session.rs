//! Session payload carried in the signed session cookie.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hinata_core::{AuthMethod, CustomerId, EmailUserId};

/// Who is making the request.
///
/// The payload is denormalised so page renders need no database lookup;
/// it goes stale until the next login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub display_name: String,
    #[serde(default)]
    pub picture_url: Option<String>,
    /// `None` until the identity is linked to a commerce customer.
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    pub auth_method: AuthMethod,
    pub linked_at: DateTime<Utc>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub line_user_id: Option<String>,
    #[serde(default)]
    pub email_user_id: Option<EmailUserId>,
}

impl SessionPayload {
    /// A payload with only the required fields set.
    #[must_use]
    pub fn new(display_name: impl Into<String>, auth_method: AuthMethod) -> Self {
        Self {
            display_name: display_name.into(),
            picture_url: None,
            customer_id: None,
            auth_method,
            linked_at: Utc::now(),
            email: None,
            line_user_id: None,
            email_user_id: None,
        }
    }
}
