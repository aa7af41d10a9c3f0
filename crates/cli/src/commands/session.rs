//! Login, logout and account commands.
//!
//! # Usage
//!
//! ```bash
//! # Log in (password from GATEHOUSE_PASSWORD)
//! gatehouse login -e admin@example.com --remember
//!
//! # Log in again with the remembered email
//! gatehouse login
//!
//! # Change password (values from GATEHOUSE_*_PASSWORD)
//! gatehouse change-password
//! ```

use gatehouse::SessionManager;
use gatehouse_core::{ChangePasswordRequest, LoginCredentials, Permission, TokenId, UserId};

use super::CommandError;

/// Log in, falling back to the remembered email.
pub async fn login(
    session: &SessionManager,
    email: Option<String>,
    password: String,
    remember: bool,
) -> Result<(), CommandError> {
    session.initialize().await;

    let email = email
        .or_else(|| session.remembered_username())
        .ok_or(CommandError::MissingEmail)?;

    let user = session
        .login(LoginCredentials::new(email, password), remember)
        .await?;

    let roles: Vec<String> = user.roles.iter().map(ToString::to_string).collect();
    tracing::info!(roles = %roles.join(", "), "Logged in as {}", user.display_name());
    Ok(())
}

pub async fn logout(session: &SessionManager) {
    session.initialize().await;
    session.logout().await;
}

/// Show the current user and what they may access.
pub async fn whoami(session: &SessionManager) {
    session.initialize().await;

    let Some(user) = session.user() else {
        match session.remembered_username() {
            Some(email) => tracing::info!("Not logged in (last login: {email})"),
            None => tracing::info!("Not logged in"),
        }
        return;
    };

    let permissions: Vec<String> = Permission::ALL
        .into_iter()
        .filter(|permission| session.has_permission(*permission))
        .map(|permission| permission.to_string())
        .collect();
    let snapshot = session.session();

    tracing::info!(
        id = user.id.as_ref().map_or("-", UserId::as_str),
        email = user.email.as_deref().unwrap_or("-"),
        token_id = snapshot.token_id.as_ref().map_or("-", TokenId::as_str),
        permissions = %permissions.join(", "),
        "{}",
        user.display_name()
    );
}

pub async fn change_password(
    session: &SessionManager,
    old: String,
    new: String,
    confirm: String,
) -> Result<(), CommandError> {
    session.initialize().await;
    if !session.is_authenticated() {
        return Err(CommandError::NotLoggedIn);
    }

    let response = session
        .change_password(&ChangePasswordRequest::new(old, new, confirm))
        .await?;

    let message = response.message.as_deref().unwrap_or("Password changed");
    if response.success {
        tracing::info!("{message}");
    } else {
        tracing::warn!("{message}");
    }
    Ok(())
}
