//! Gatehouse Core - Shared session types.
//!
//! This crate provides the types used across Gatehouse components:
//! - `gatehouse` - Session manager library (token store, HTTP pipeline, refresh)
//! - `gatehouse-cli` - Command-line front end
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no storage,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Identity records, roles and permissions, credentials, token
//!   introspection and cross-tab session events

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
