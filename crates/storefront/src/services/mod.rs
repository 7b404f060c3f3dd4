//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `verification` - One-time codes (issue, verify, cooldown, attempts)
//! - `email` - Code delivery over SMTP
//! - `session` - Signed session cookie
//! - `linking` - Email/LINE identity to commerce customer resolution
//! - `auth` - Email and LINE sign-in flows
//! - `passkey` - `WebAuthn` ceremonies and passkey management
//! - `member` - Member profile, wallet, tier, orders and preferences

pub mod auth;
pub mod email;
pub mod linking;
pub mod member;
pub mod passkey;
pub mod session;
pub mod verification;
