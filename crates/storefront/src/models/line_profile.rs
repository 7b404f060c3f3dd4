//! LINE-linked identity records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hinata_core::{CustomerId, Email};

/// Metadata key holding the last shipping details used at checkout.
const LAST_SHIPPING_KEY: &str = "last_shipping";

/// A member who signed in with LINE.
#[derive(Debug, Clone)]
pub struct LineProfile {
    /// LINE user ID (`U` followed by 32 hex chars).
    pub line_user_id: String,
    /// Display name from the LINE profile.
    pub display_name: String,
    /// Profile picture URL.
    pub picture_url: Option<String>,
    /// Linked commerce customer.
    pub customer_id: Option<CustomerId>,
    /// Email bound to this profile, from the id token or an email bind.
    pub email: Option<Email>,
    /// Free-form metadata (includes last-used shipping info).
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LineProfile {
    /// Last shipping details saved in the profile metadata, if any.
    #[must_use]
    pub fn last_shipping(&self) -> Option<ShippingInfo> {
        self.metadata
            .get(LAST_SHIPPING_KEY)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

/// Profile data written on each LINE login.
///
/// Customer ID and metadata are preserved by the upsert.
#[derive(Debug, Clone)]
pub struct LineProfileUpsert {
    pub line_user_id: String,
    pub display_name: String,
    pub picture_url: Option<String>,
    pub email: Option<Email>,
}

/// Shipping details remembered between checkouts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingInfo {
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub store_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(metadata: serde_json::Value) -> LineProfile {
        LineProfile {
            line_user_id: "U4af4980629".to_owned(),
            display_name: "Aki".to_owned(),
            picture_url: None,
            customer_id: None,
            email: None,
            metadata,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_last_shipping_reads_metadata() {
        let p = profile(serde_json::json!({
            "last_shipping": { "recipientName": "Aki", "postalCode": "100-0001" }
        }));
        let shipping = p.last_shipping();
        assert_eq!(
            shipping,
            Some(ShippingInfo {
                recipient_name: Some("Aki".to_owned()),
                postal_code: Some("100-0001".to_owned()),
                ..ShippingInfo::default()
            })
        );
    }

    #[test]
    fn test_last_shipping_missing_or_malformed() {
        assert_eq!(profile(serde_json::json!({})).last_shipping(), None);
        assert_eq!(
            profile(serde_json::json!({ "last_shipping": "nope" })).last_shipping(),
            None
        );
    }
}
