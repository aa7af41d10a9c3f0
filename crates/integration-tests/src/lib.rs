//! Integration tests for Gatehouse.
//!
//! Every test runs the session manager against a `wiremock` server standing
//! in for the dashboard API. Several [`SessionManager`]s opened against one
//! [`Origin`] play the part of browser tabs.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p gatehouse-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `login` - Single-flight login, remember-me, malformed responses
//! - `refresh` - 401 handling, refresh queuing and failure cascade
//! - `lifecycle` - initialize, logout, activity flags, change password
//! - `cross_tab` - Sync between tabs over broadcast and storage events
//! - `file_session` - Sessions persisted to disk

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use gatehouse::{
    BroadcastBus, ClientConfig, MemoryBackend, Notice, Notifier, Origin, Session, SessionManager,
    SharedStorage, StorageKey,
};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// How long a test waits for something asynchronous to happen.
pub const WAIT: Duration = Duration::from_secs(5);

/// Notifier that keeps every notice for inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn count(&self, notice: Notice) -> usize {
        self.notices().into_iter().filter(|n| *n == notice).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// One simulated browser tab.
pub struct Tab {
    pub session: SessionManager,
    pub notices: Arc<RecordingNotifier>,
}

impl Tab {
    /// Open a tab of `origin` talking to `server`.
    pub fn open(server: &MockServer, origin: &Origin) -> Self {
        Self::open_with(config(server), origin)
    }

    pub fn open_with(config: ClientConfig, origin: &Origin) -> Self {
        let notices = Arc::new(RecordingNotifier::default());
        let session = SessionManager::with_notifier(config, origin, notices.clone()).unwrap();
        Self { session, notices }
    }

    /// Wait until the session satisfies `predicate`, failing the test after
    /// [`WAIT`].
    pub async fn wait_for(&self, predicate: impl FnMut(&Session) -> bool) {
        let mut receiver = self.session.subscribe();
        tokio::time::timeout(WAIT, receiver.wait_for(predicate))
            .await
            .expect("timed out waiting for session state")
            .unwrap();
    }
}

/// Client configuration pointing at `server`, with a short timeout.
pub fn config(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::new(server.uri().parse().unwrap());
    config.timeout = Duration::from_secs(2);
    config
}

/// Origin with a broadcast channel whose storage starts out holding
/// `entries`.
pub fn seeded_origin<const N: usize>(entries: [(StorageKey, &str); N]) -> Origin {
    Origin::new(
        SharedStorage::new(MemoryBackend::with_entries(entries)),
        Arc::new(BroadcastBus::new("auth-events")),
    )
}

/// An unsigned JWT carrying `claims`.
pub fn fake_jwt(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

/// User record as returned by `/auth/me`.
pub fn user_json(email: &str, roles: &[&str]) -> Value {
    json!({
        "id": "42",
        "name": "Ada Admin",
        "email": email,
        "roles": roles,
    })
}

/// Body of a successful login response.
pub fn login_json(access_token: &str, refresh_token: &str) -> Value {
    json!({
        "data": {
            "access_token": access_token,
            "refresh_token": refresh_token,
            "user": user_json("ada@example.com", &["ADMINISTRATOR"]),
        }
    })
}

/// `/auth/login` answering with the given pair.
pub fn login_mock(access_token: &str, refresh_token: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_json(access_token, refresh_token)))
}

/// `/auth/me` answering `user` for requests bearing `access_token`.
pub fn me_mock(access_token: &str, user: Value) -> Mock {
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", format!("Bearer {access_token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(user))
}

/// `/auth/refresh-token` issuing `access_token`.
pub fn refresh_mock(access_token: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": access_token })))
}

/// `/auth/logout` accepting any request.
pub fn logout_mock() -> Mock {
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
}
