//! The shared HTTP pipeline.
//!
//! Every API call of a tab goes through one [`ApiClient`]:
//!
//! 1. the stored access token is attached as a bearer credential, unless the
//!    request opts out;
//! 2. the loading indicator is held for the duration of the call, unless the
//!    request is silent;
//! 3. a response that never arrives sets the network-error flag and raises a
//!    [`Notice::NetworkError`];
//! 4. a 401 on an ordinary request waits on the single in-flight refresh
//!    and the request is replayed once with the new token;
//! 5. if the refresh fails the tab is logged out locally and a single
//!    [`Notice::Unauthorized`] is raised.

mod auth;
mod refresh;

use std::sync::Arc;

use reqwest::{Method, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

pub use auth::{ChangePasswordResponse, TokenPair};

use refresh::{RefreshCoordinator, Ticket};

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::events::CrossTabNotifier;
use crate::notify::{Notice, Notifier};
use crate::state::SessionState;
use crate::status::ActivityMonitor;
use crate::storage::{StorageKey, TokenStore};

/// Body of an [`ApiRequest`], kept so the request can be replayed.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Text(String),
}

/// Per-request opt-outs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Do not attach the bearer credential.
    pub skip_auth: bool,
    /// Do not hold the loading indicator.
    pub skip_loading: bool,
}

/// A replayable API request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, or an absolute URL.
    pub path: String,
    pub body: RequestBody,
    pub options: RequestOptions,
    retried: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            options: RequestOptions::default(),
            retried: false,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = RequestBody::Text(body.into());
        self
    }

    #[must_use]
    pub const fn skip_auth(mut self) -> Self {
        self.options.skip_auth = true;
        self
    }

    #[must_use]
    pub const fn skip_loading(mut self) -> Self {
        self.options.skip_loading = true;
        self
    }

    /// Whether this request has already been through a token refresh.
    #[must_use]
    pub const fn is_retried(&self) -> bool {
        self.retried
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidResponse` if the body does not decode.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// The body as text, with invalid UTF-8 replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The HTTP pipeline of one tab.
///
/// Cheap to clone; clones share the token store, refresh state and activity
/// flags.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    http: reqwest::Client,
    config: ClientConfig,
    store: TokenStore,
    cross_tab: CrossTabNotifier,
    session: Arc<SessionState>,
    activity: Arc<ActivityMonitor>,
    notifier: Arc<dyn Notifier>,
    refresh: RefreshCoordinator,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("api_url", &self.inner.config.api_url.as_str())
            .field("tab", &self.inner.store.tab())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Build the pipeline for one tab.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Client` if the HTTP client cannot be created.
    pub fn new(
        config: ClientConfig,
        store: TokenStore,
        cross_tab: CrossTabNotifier,
        session: Arc<SessionState>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                http,
                config,
                store,
                cross_tab,
                session,
                activity: Arc::new(ActivityMonitor::default()),
                notifier,
                refresh: RefreshCoordinator::new(),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// True while any non-silent request is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.activity.is_loading()
    }

    /// True after a request got no response, until a later one succeeds.
    #[must_use]
    pub fn has_network_error(&self) -> bool {
        self.inner.activity.has_network_error()
    }

    /// True while a token refresh is in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.is_refreshing()
    }

    /// GET `path` and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns any pipeline error, or `ApiError::InvalidResponse` if the body
    /// does not decode.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    /// POST `body` as JSON to `path` and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns any pipeline error, or `ApiError::InvalidResponse` if the body
    /// does not decode.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::Internal(format!("failed to encode request body: {e}")))?;
        self.send(ApiRequest::post(path).json(body)).await?.json()
    }

    /// Send a request through the full pipeline, refreshing the access token
    /// and replaying once on a 401.
    ///
    /// # Errors
    ///
    /// - `ApiError::Network` if no response was received
    /// - `ApiError::Authentication` for a 401 from the login or refresh endpoint
    /// - `ApiError::SessionExpired` if the token could not be refreshed
    /// - `ApiError::Status` for any other non-success status
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        match self.dispatch(&request).await {
            Err(err) if err.status() == Some(StatusCode::UNAUTHORIZED) => {
                self.recover(request, err).await
            }
            result => result,
        }
    }

    /// Handle a 401 on `request`.
    async fn recover(&self, mut request: ApiRequest, err: ApiError) -> Result<ApiResponse, ApiError> {
        if self.inner.config.is_auth_endpoint(&request.path) {
            return Err(authentication_error(err));
        }
        if request.retried {
            tracing::debug!("Replayed request rejected again, not refreshing");
            return Err(err);
        }
        request.retried = true;

        match self.inner.refresh.begin() {
            Ticket::Follower(outcome) => match outcome.await {
                Ok(Ok(())) => self.dispatch(&request).await,
                Ok(Err(err)) => Err(err),
                Err(_) => Err(ApiError::SessionExpired(
                    "token refresh was abandoned".to_string(),
                )),
            },
            Ticket::Leader(lease) => match self.refresh_access_token().await {
                Ok(()) => {
                    lease.settle(&Ok(()));
                    self.dispatch(&request).await
                }
                Err(err) => {
                    let err = self.force_logout(err);
                    lease.settle(&Err(err.clone()));
                    Err(err)
                }
            },
        }
    }

    /// Exchange the stored refresh token for a new access token.
    async fn refresh_access_token(&self) -> Result<(), ApiError> {
        let refresh_token = self
            .inner
            .store
            .refresh_token()?
            .ok_or_else(|| ApiError::SessionExpired("no refresh token".to_string()))?;
        let access_token = self.refresh(&refresh_token).await?;
        self.inner.store.set(StorageKey::AccessToken, &access_token)?;
        tracing::info!("Access token refreshed");
        Ok(())
    }

    /// Log this tab out after a failed refresh.
    fn force_logout(&self, err: ApiError) -> ApiError {
        let reason = match err {
            ApiError::SessionExpired(reason) => reason,
            other => other.to_string(),
        };
        tracing::warn!(%reason, "Token refresh failed, logging out");

        self.inner.session.clear_identity();
        if let Err(e) = self.inner.store.clear_tokens() {
            tracing::error!(error = %e, "Failed to clear tokens");
        }
        if let Err(e) = self.inner.store.remove(StorageKey::LoginBroadcast) {
            tracing::warn!(error = %e, "Failed to clear login broadcast marker");
        }
        self.inner.cross_tab.announce_logout();
        self.inner.notifier.notify(Notice::Unauthorized);

        ApiError::SessionExpired(reason)
    }

    /// One attempt at `request`, with no refresh handling.
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let _loading = (!request.options.skip_loading).then(|| self.inner.activity.begin());

        let url = self.inner.config.resolve(&request.path)?;
        let mut builder = self.inner.http.request(request.method.clone(), url);
        if !request.options.skip_auth
            && let Some(token) = self.inner.store.access_token()?
        {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Text(text) => builder
                .header(header::CONTENT_TYPE, "text/plain")
                .body(text.clone()),
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return Err(self.network_failure(err)),
        };
        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body.to_vec(),
            Err(err) => return Err(self.network_failure(err)),
        };

        if status.is_success() {
            self.inner.activity.set_network_error(false);
            return Ok(ApiResponse { status, body });
        }

        tracing::debug!(%status, "Request failed");
        Err(ApiError::Status {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    fn network_failure(&self, err: reqwest::Error) -> ApiError {
        tracing::warn!(error = %err, "No response from server");
        self.inner.activity.set_network_error(true);
        self.inner.notifier.notify(Notice::NetworkError);
        err.into()
    }
}

/// Turn a 401 from the login or refresh endpoint into an authentication
/// error carrying the server's message.
fn authentication_error(err: ApiError) -> ApiError {
    match err {
        ApiError::Status { body, .. } => {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|value| value.get("message")?.as_str().map(str::to_owned))
                .unwrap_or(body);
            if message.trim().is_empty() {
                ApiError::Authentication("unauthorized".to_string())
            } else {
                ApiError::Authentication(message)
            }
        }
        other => other,
    }
}
