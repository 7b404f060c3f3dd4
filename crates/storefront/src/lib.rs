//! Hinata storefront auth and member API.
//!
//! This crate provides the storefront functionality as a library,
//! allowing it to be tested and reused.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod commerce;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod line;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
