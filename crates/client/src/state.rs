//! Observable session state shared by the session manager and the HTTP
//! pipeline.

use gatehouse_core::{TokenId, User};
use tokio::sync::watch;

/// Snapshot of one tab's session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Identity confirmed by the "who am I" endpoint.
    pub user: Option<User>,
    /// Id claim of the current access token.
    pub token_id: Option<TokenId>,
    pub is_logging_in: bool,
    pub is_initialized: bool,
}

impl Session {
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Holder of the current [`Session`], with change notification.
#[derive(Debug)]
pub struct SessionState {
    sender: watch::Sender<Session>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sender: watch::Sender::new(Session::default()),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.sender.borrow().clone()
    }

    /// Receiver that is woken on every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.sender.subscribe()
    }

    pub(crate) fn set_user(&self, user: User) {
        self.sender.send_modify(|session| session.user = Some(user));
    }

    pub(crate) fn set_token_id(&self, token_id: Option<TokenId>) {
        self.sender.send_modify(|session| session.token_id = token_id);
    }

    pub(crate) fn set_logging_in(&self, value: bool) {
        self.sender.send_modify(|session| session.is_logging_in = value);
    }

    pub(crate) fn set_initialized(&self, value: bool) {
        self.sender.send_modify(|session| session.is_initialized = value);
    }

    /// Forget the user and token id.
    pub(crate) fn clear_identity(&self) {
        self.sender.send_modify(|session| {
            session.user = None;
            session.token_id = None;
        });
    }
}
