//! Session manager: one per tab.
//!
//! Owns the current-user state and drives login, logout and restoration from
//! persisted tokens. Sibling tabs of the same [`Origin`] are kept in sync
//! through the cross-tab notifier.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use gatehouse_core::{
    ChangePasswordRequest, LoginCredentials, Permission, Role, SessionEvent, User,
    token_id_from_jwt,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::events::CrossTabNotifier;
use crate::http::{ApiClient, ChangePasswordResponse};
use crate::notify::{Notifier, TracingNotifier};
use crate::origin::{Origin, TabId};
use crate::state::{Session, SessionState};
use crate::storage::{StorageKey, TokenStore};

type LoginFlight = Shared<BoxFuture<'static, Result<User, ApiError>>>;

/// Session of one tab.
///
/// Cheap to clone; clones are the same tab. The cross-tab listener stops when
/// the last clone is dropped.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    client: ApiClient,
    store: TokenStore,
    cross_tab: CrossTabNotifier,
    state: Arc<SessionState>,
    /// Login currently in flight, shared by every caller.
    login_flight: tokio::sync::Mutex<Option<LoginFlight>>,
    /// Serializes `initialize`.
    init_lock: tokio::sync::Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("tab", &self.inner.store.tab())
            .field("session", &self.inner.state.snapshot())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Open a new tab against `origin`. Notices are written to the log.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Client` if the HTTP client cannot be created.
    pub fn new(config: ClientConfig, origin: &Origin) -> Result<Self, ApiError> {
        Self::with_notifier(config, origin, Arc::new(TracingNotifier))
    }

    /// Open a new tab against `origin`, delivering notices to `notifier`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Client` if the HTTP client cannot be created.
    pub fn with_notifier(
        config: ClientConfig,
        origin: &Origin,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ApiError> {
        let store = origin.storage().handle(TabId::new());
        let cross_tab = CrossTabNotifier::new(store.clone(), origin.bus());
        let state = Arc::new(SessionState::new());
        let client = ApiClient::new(
            config,
            store.clone(),
            cross_tab.clone(),
            Arc::clone(&state),
            notifier,
        )?;

        tracing::debug!(tab = %store.tab(), "Opened session");

        Ok(Self {
            inner: Arc::new(SessionInner {
                client,
                store,
                cross_tab,
                state,
                login_flight: tokio::sync::Mutex::new(None),
                init_lock: tokio::sync::Mutex::new(()),
                listener: Mutex::new(None),
            }),
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restore the session from persisted tokens and start listening to
    /// sibling tabs.
    ///
    /// Idempotent; concurrent callers are serialized. A stored access token
    /// that the server no longer accepts is cleared together with its
    /// refresh token.
    #[instrument(skip(self), fields(tab = %self.tab()))]
    pub async fn initialize(&self) {
        let _guard = self.inner.init_lock.lock().await;
        if self.inner.state.snapshot().is_initialized {
            return;
        }

        self.cleanup();

        match self.inner.store.access_token() {
            Ok(Some(access_token)) => {
                self.inner.save_token_id(&access_token);
                match self.inner.get_me().await {
                    Ok(user) => tracing::info!(user = %user.display_name(), "Session restored"),
                    Err(err) => {
                        tracing::warn!(error = %err, "Failed to restore session");
                        self.inner.state.clear_identity();
                        if let Err(e) = self.inner.store.clear_tokens() {
                            tracing::error!(error = %e, "Failed to clear stale tokens");
                        }
                    }
                }
            }
            Ok(None) => tracing::debug!("No stored session"),
            Err(err) => tracing::error!(error = %err, "Failed to read stored session"),
        }

        let listener = spawn_listener(&self.inner);
        *self.inner.listener_slot() = Some(listener);
        self.inner.state.set_initialized(true);
    }

    /// Stop listening to sibling tabs.
    ///
    /// A later [`initialize`](Self::initialize) starts listening again.
    pub fn cleanup(&self) {
        self.inner.stop_listener();
        self.inner.state.set_initialized(false);
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Log in, or join the login already in flight.
    ///
    /// The login runs as its own task: it completes, and the in-flight guard
    /// is released, even if every caller stops waiting.
    ///
    /// # Errors
    ///
    /// - `ApiError::Validation` for a blank email or empty password (only
    ///   checked when no login is in flight)
    /// - `ApiError::Authentication` if the server rejects the credentials
    /// - `ApiError::InvalidResponse` if the server returns no token pair
    /// - any error from storing the tokens or fetching the user
    #[instrument(skip_all, fields(tab = %self.tab()))]
    pub async fn login(
        &self,
        credentials: LoginCredentials,
        remember_me: bool,
    ) -> Result<User, ApiError> {
        let flight = {
            let mut slot = self.inner.login_flight.lock().await;
            if let Some(flight) = slot.as_ref() {
                tracing::debug!("Login already in progress, joining it");
                flight.clone()
            } else {
                credentials.validate()?;
                self.inner.state.set_logging_in(true);

                let inner = Arc::clone(&self.inner);
                let task = tokio::spawn(async move {
                    let result = inner.perform_login(&credentials, remember_me).await;
                    if let Err(err) = &result {
                        tracing::warn!(error = %err, "Login failed");
                    }
                    *inner.login_flight.lock().await = None;
                    inner.state.set_logging_in(false);
                    result
                });
                let flight = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(ApiError::Internal(format!("login task failed: {e}")))
                    })
                }
                .boxed()
                .shared();
                *slot = Some(flight.clone());
                flight
            }
        };
        flight.await
    }

    /// Log out of this tab and tell sibling tabs.
    ///
    /// The server call is best-effort; local state is always cleared.
    #[instrument(skip(self), fields(tab = %self.tab()))]
    pub async fn logout(&self) {
        self.inner.state.clear_identity();

        if let Err(err) = self.inner.client.logout_remote().await {
            tracing::warn!(error = %err, "Logout request failed");
        }

        if let Err(err) = self.inner.store.clear_tokens() {
            tracing::error!(error = %err, "Failed to clear tokens");
        }
        if let Err(err) = self.inner.store.remove(StorageKey::LoginBroadcast) {
            tracing::warn!(error = %err, "Failed to clear login broadcast marker");
        }
        self.inner.cross_tab.announce_logout();
        tracing::info!("Logged out");
    }

    /// Fetch and store the identity behind the current access token.
    ///
    /// # Errors
    ///
    /// Returns any error from the "who am I" call; the stored identity is
    /// left unchanged.
    pub async fn get_me(&self) -> Result<User, ApiError> {
        self.inner.get_me().await
    }

    /// Change the current user's password.
    ///
    /// # Errors
    ///
    /// - `ApiError::Validation` if a field is empty or the confirmation differs
    /// - any pipeline error from the endpoint
    pub async fn change_password(
        &self,
        request: &ChangePasswordRequest,
    ) -> Result<ChangePasswordResponse, ApiError> {
        self.inner.client.change_password(request).await
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Current session snapshot.
    #[must_use]
    pub fn session(&self) -> Session {
        self.inner.state.snapshot()
    }

    /// Receiver woken on every session change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.inner.state.snapshot().user
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.snapshot().is_authenticated()
    }

    /// Whether the current user holds any of `roles`. False when logged out.
    #[must_use]
    pub fn has_role(&self, roles: &[Role]) -> bool {
        self.inner
            .state
            .snapshot()
            .user
            .is_some_and(|user| user.has_role(roles))
    }

    /// Whether the current user's roles grant `permission`. False when
    /// logged out.
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.inner
            .state
            .snapshot()
            .user
            .is_some_and(|user| user.has_permission(permission))
    }

    /// Email remembered by the last "remember me" login, for prefilling a
    /// login form. Stored in plain text.
    #[must_use]
    pub fn remembered_username(&self) -> Option<String> {
        self.inner
            .store
            .get(StorageKey::SavedUsername)
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "Failed to read remembered username");
                None
            })
    }

    /// The HTTP pipeline of this tab, for other API calls.
    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    #[must_use]
    pub fn tab(&self) -> TabId {
        self.inner.store.tab()
    }
}

impl SessionInner {
    async fn perform_login(
        &self,
        credentials: &LoginCredentials,
        remember_me: bool,
    ) -> Result<User, ApiError> {
        let tokens = self.client.login(credentials).await?;
        self.store
            .store_tokens(&tokens.access_token, &tokens.refresh_token)?;
        self.cross_tab.announce_login();
        self.save_token_id(&tokens.access_token);
        self.remember_username(credentials.email(), remember_me);

        let user = self.get_me().await?;
        tracing::info!(user = %user.display_name(), "Logged in");
        Ok(user)
    }

    async fn get_me(&self) -> Result<User, ApiError> {
        let user = self.client.me().await?;
        self.state.set_user(user.clone());
        Ok(user)
    }

    fn save_token_id(&self, access_token: &str) {
        let token_id = token_id_from_jwt(access_token).unwrap_or_else(|err| {
            tracing::debug!(error = %err, "Access token carries no readable id");
            None
        });
        self.state.set_token_id(token_id);
    }

    fn remember_username(&self, email: &str, remember_me: bool) {
        let result = if remember_me && !email.is_empty() {
            self.store.set(StorageKey::SavedUsername, email)
        } else {
            self.store.remove(StorageKey::SavedUsername)
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, "Failed to save remember-me preference");
        }
    }

    async fn on_sibling_event(&self, event: SessionEvent) {
        tracing::debug!(%event, tab = %self.store.tab(), "Session event from another tab");
        match event {
            SessionEvent::LoggedIn => match self.store.access_token() {
                Ok(Some(access_token)) => {
                    self.save_token_id(&access_token);
                    if let Err(err) = self.get_me().await {
                        tracing::warn!(error = %err, "Failed to load user after login in another tab");
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "Failed to read access token"),
            },
            SessionEvent::LoggedOut => self.state.clear_identity(),
        }
    }

    fn listener_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_listener(&self) {
        if let Some(listener) = self.listener_slot().take() {
            listener.abort();
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

/// Forward sibling-tab events to the session until it is dropped.
fn spawn_listener(inner: &Arc<SessionInner>) -> JoinHandle<()> {
    let mut events = inner.cross_tab.listen();
    let session: Weak<SessionInner> = Arc::downgrade(inner);
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let Some(inner) = session.upgrade() else {
                break;
            };
            inner.on_sibling_event(event).await;
        }
    })
}
