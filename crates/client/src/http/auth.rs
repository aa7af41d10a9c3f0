//! Typed calls to the authentication endpoints.

use gatehouse_core::{ChangePasswordRequest, LoginCredentials, User};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{ApiClient, ApiRequest, ApiResponse, authentication_error};
use crate::error::ApiError;

/// Access and refresh token issued by a login.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Result of a password change.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangePasswordResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub success: bool,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginEnvelope {
    #[serde(default)]
    data: Option<LoginData>,
}

#[derive(Debug, Default, Deserialize)]
struct LoginData {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordBody<'a> {
    old_password: &'a str,
    new_password: &'a str,
    confirm_password: &'a str,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

impl ApiClient {
    /// Exchange credentials for a token pair.
    ///
    /// Nothing is persisted here; the session manager stores the pair.
    ///
    /// # Errors
    ///
    /// - `ApiError::Authentication` if the server rejects the credentials
    /// - `ApiError::InvalidResponse` if the response lacks either token
    #[instrument(skip(self, credentials), fields(email = %credentials.email()))]
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<TokenPair, ApiError> {
        let body = serde_json::to_value(LoginBody {
            email: credentials.email(),
            password: credentials.password().expose_secret(),
        })
        .map_err(|e| ApiError::Internal(format!("failed to encode login request: {e}")))?;
        let request = ApiRequest::post(&self.inner.config.endpoints.login)
            .json(body)
            .skip_auth();

        let envelope: LoginEnvelope = self.dispatch_auth(&request).await?.json()?;
        let data = envelope.data.unwrap_or_default();
        match (non_empty(data.access_token), non_empty(data.refresh_token)) {
            (Some(access_token), Some(refresh_token)) => Ok(TokenPair {
                access_token,
                refresh_token,
            }),
            _ => Err(ApiError::InvalidResponse(
                "login response is missing tokens".to_string(),
            )),
        }
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The refresh token is sent as the raw `text/plain` body.
    ///
    /// # Errors
    ///
    /// - `ApiError::Authentication` if the refresh token is rejected
    /// - `ApiError::InvalidResponse` if the response has no token
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, ApiError> {
        let request = ApiRequest::post(&self.inner.config.endpoints.refresh)
            .text(refresh_token)
            .skip_auth();

        let response: RefreshTokenResponse = self.dispatch_auth(&request).await?.json()?;
        non_empty(response.token)
            .ok_or_else(|| ApiError::InvalidResponse("refresh response has no token".to_string()))
    }

    /// Fetch the identity behind the current access token.
    ///
    /// # Errors
    ///
    /// Returns any pipeline error, or `ApiError::InvalidResponse` if the body
    /// is not a user record.
    #[instrument(skip(self))]
    pub async fn me(&self) -> Result<User, ApiError> {
        self.get_json(&self.inner.config.endpoints.me).await
    }

    /// Tell the server the session is over.
    ///
    /// This is a single attempt; a 401 here does not trigger a refresh.
    ///
    /// # Errors
    ///
    /// Returns any pipeline error. Callers treat this call as best-effort.
    #[instrument(skip(self))]
    pub async fn logout_remote(&self) -> Result<(), ApiError> {
        self.dispatch(&ApiRequest::post(&self.inner.config.endpoints.logout))
            .await
            .map(drop)
    }

    /// Change the current user's password.
    ///
    /// # Errors
    ///
    /// - `ApiError::Validation` if a field is empty or the confirmation differs
    /// - any pipeline error from the endpoint
    #[instrument(skip_all)]
    pub async fn change_password(
        &self,
        request: &ChangePasswordRequest,
    ) -> Result<ChangePasswordResponse, ApiError> {
        request.validate()?;
        let body = ChangePasswordBody {
            old_password: request.old_password.expose_secret(),
            new_password: request.new_password.expose_secret(),
            confirm_password: request.confirm_password.expose_secret(),
        };
        self.post_json(&self.inner.config.endpoints.change_password, &body)
            .await
    }

    /// One attempt at a login or refresh call; a 401 is an authentication
    /// failure, never a reason to refresh.
    async fn dispatch_auth(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.dispatch(request).await.map_err(|err| {
            if err.status() == Some(StatusCode::UNAUTHORIZED) {
                authentication_error(err)
            } else {
                err
            }
        })
    }
}
