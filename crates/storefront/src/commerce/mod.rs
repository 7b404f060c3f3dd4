//! Commerce backend client.
//!
//! The commerce backend is the system of record for customers, orders,
//! wallet balances and membership tiers. This module only covers the calls
//! the storefront needs:
//!
//! - Create a customer when a verified identity has none yet
//! - Read a customer's wallet, tier and recent orders
//!
//! # Architecture
//!
//! - Admin email/password -> bearer token -> admin API
//! - One cached token per process ([`AdminTokenCache`]), refreshed near expiry
//! - [`CommerceBackend`] trait so tests can swap in [`memory::InMemoryCommerce`]

pub mod auth;
pub mod client;
pub mod memory;
pub mod types;

pub use auth::{AdminToken, AdminTokenCache};
pub use client::HttpCommerceClient;
pub use memory::InMemoryCommerce;
pub use types::{MemberTier, NewCustomer, OrderSummary, Wallet};

use async_trait::async_trait;
use thiserror::Error;

use hinata_core::CustomerId;

/// Errors that can occur when talking to the commerce backend.
#[derive(Debug, Error)]
pub enum CommerceError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Admin credentials were rejected.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by the backend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Any other non-success response.
    #[error("Commerce API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Calls the storefront makes against the commerce backend.
#[async_trait]
pub trait CommerceBackend: Send + Sync {
    /// Mint a customer and return its ID.
    async fn create_customer(&self, customer: &NewCustomer) -> Result<CustomerId, CommerceError>;

    async fn wallet(&self, customer_id: &CustomerId) -> Result<Wallet, CommerceError>;

    async fn tier(&self, customer_id: &CustomerId) -> Result<MemberTier, CommerceError>;

    /// Most recent orders first.
    async fn orders(
        &self,
        customer_id: &CustomerId,
        limit: u32,
    ) -> Result<Vec<OrderSummary>, CommerceError>;
}
