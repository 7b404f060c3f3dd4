//! Hinata Core - Shared types library.
//!
//! This crate provides common types used across all Hinata components:
//! - `storefront` - Auth, session, and member API for the storefront
//! - `cli` - Command-line tools for migrations
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, emails, money, and auth enums

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
