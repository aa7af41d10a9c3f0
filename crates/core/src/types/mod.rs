//! Core types for Gatehouse.
//!
//! This module provides type-safe wrappers for identities, roles, credentials
//! and session events.

pub mod credential;
pub mod event;
pub mod id;
pub mod role;
pub mod token;
pub mod user;

pub use credential::{ChangePasswordRequest, CredentialError, LoginCredentials};
pub use event::SessionEvent;
pub use id::{TokenId, UserId};
pub use role::{Permission, Role};
pub use token::{TokenClaimsError, token_id_from_jwt};
pub use user::User;
