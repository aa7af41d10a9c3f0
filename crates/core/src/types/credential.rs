//! User-supplied credentials.
//!
//! Passwords are wrapped in [`SecretString`] so they never show up in `Debug`
//! output or logs.

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Errors raised by local credential validation, before any network call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Email or password is empty (or whitespace-only).
    #[error("username and password are required")]
    MissingCredentials,
    /// A password-change field is empty.
    #[error("{0} is required")]
    MissingField(&'static str),
    /// New password and its confirmation differ.
    #[error("new password and confirmation do not match")]
    ConfirmationMismatch,
}

/// Email/password pair submitted to the login endpoint.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    email: String,
    password: SecretString,
}

impl LoginCredentials {
    /// Create credentials. Validation happens in [`Self::validate`].
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Check that neither field is blank.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::MissingCredentials` if the email or the
    /// password is empty or whitespace-only.
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.email.trim().is_empty() || self.password.expose_secret().trim().is_empty() {
            return Err(CredentialError::MissingCredentials);
        }
        Ok(())
    }

    /// The email with surrounding whitespace removed, as sent to the server.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.trim()
    }

    #[must_use]
    pub const fn password(&self) -> &SecretString {
        &self.password
    }
}

/// Request to change the current user's password.
#[derive(Debug, Clone)]
pub struct ChangePasswordRequest {
    pub old_password: SecretString,
    pub new_password: SecretString,
    pub confirm_password: SecretString,
}

impl ChangePasswordRequest {
    #[must_use]
    pub fn new(
        old_password: impl Into<String>,
        new_password: impl Into<String>,
        confirm_password: impl Into<String>,
    ) -> Self {
        Self {
            old_password: SecretString::from(old_password.into()),
            new_password: SecretString::from(new_password.into()),
            confirm_password: SecretString::from(confirm_password.into()),
        }
    }

    /// Check that all fields are present and the confirmation matches.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::MissingField` for an empty field and
    /// `CredentialError::ConfirmationMismatch` if the new password and its
    /// confirmation differ.
    pub fn validate(&self) -> Result<(), CredentialError> {
        for (field, value) in [
            ("old password", &self.old_password),
            ("new password", &self.new_password),
            ("password confirmation", &self.confirm_password),
        ] {
            if value.expose_secret().is_empty() {
                return Err(CredentialError::MissingField(field));
            }
        }
        if self.new_password.expose_secret() != self.confirm_password.expose_secret() {
            return Err(CredentialError::ConfirmationMismatch);
        }
        Ok(())
    }
}
