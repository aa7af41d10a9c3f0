//! Gatehouse session manager library.
//!
//! Keeps an authenticated session against a dashboard API: persisted token
//! pair, single-flight login, transparent access-token refresh with request
//! queuing, and login/logout sync between tabs of the same origin.
//!
//! # Architecture
//!
//! - [`storage`] - Token store over a pluggable backend (memory or JSON file)
//! - [`events`] - Cross-tab login/logout notifications
//! - [`http`] - The shared request pipeline and single-flight refresh
//! - [`session`] - Per-tab session manager
//!
//! An [`Origin`] is what a set of tabs share; each [`SessionManager`] opened
//! against it is one tab.
//!
//! ```no_run
//! use gatehouse::{ClientConfig, Origin, SessionManager};
//! use gatehouse_core::LoginCredentials;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let origin = Origin::file(&config.session_dir, &config.channel_name);
//! let session = SessionManager::new(config, &origin)?;
//! session.initialize().await;
//! if !session.is_authenticated() {
//!     session
//!         .login(LoginCredentials::new("admin@example.com", "secret"), true)
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod notify;
pub mod origin;
pub mod session;
pub mod state;
pub mod status;
pub mod storage;

pub use config::{ClientConfig, ConfigError, Endpoints};
pub use error::ApiError;
pub use events::{BroadcastBus, BusError, BusMessage, CrossTabNotifier, SessionEventBus};
pub use http::{
    ApiClient, ApiRequest, ApiResponse, ChangePasswordResponse, RequestBody, RequestOptions,
    TokenPair,
};
pub use notify::{Notice, Notifier, TracingNotifier};
pub use origin::{Origin, TabId};
pub use session::SessionManager;
pub use state::{Session, SessionState};
pub use storage::{
    FileBackend, MemoryBackend, SharedStorage, StorageBackend, StorageError, StorageKey,
    TokenStore,
};
