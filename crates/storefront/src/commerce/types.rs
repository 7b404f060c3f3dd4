//! Commerce backend request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hinata_core::Money;

/// Customer to create in the backend.
#[derive(Debug, Clone, Serialize)]
pub struct NewCustomer {
    pub email: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_user_id: Option<String>,
}

/// Stored-value balance and loyalty points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub balance: Money,
    #[serde(default)]
    pub points: i64,
}

/// Membership tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberTier {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub next_tier: Option<String>,
    #[serde(default)]
    pub points_to_next: Option<i64>,
}

/// One line in the order history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: String,
    pub number: String,
    pub status: String,
    pub total: Money,
    pub placed_at: DateTime<Utc>,
}
