//! Single-flight access-token refresh.
//!
//! The first request to need a refresh becomes the leader and performs it;
//! requests needing one while it runs wait in a FIFO queue and are settled
//! with the leader's outcome.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::ApiError;

type Waiter = oneshot::Sender<Result<(), ApiError>>;

#[derive(Debug, Default)]
struct RefreshState {
    refreshing: bool,
    waiters: VecDeque<Waiter>,
}

/// Tracks whether a refresh is in flight and who is waiting on it.
///
/// The lock is never held across an await.
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

/// Role of a request that needs a refresh.
#[derive(Debug)]
pub enum Ticket<'a> {
    /// Perform the refresh, then settle the lease.
    Leader(RefreshLease<'a>),
    /// Wait for the leader's outcome.
    Follower(oneshot::Receiver<Result<(), ApiError>>),
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight refresh, or start one.
    pub fn begin(&self) -> Ticket<'_> {
        let mut state = self.lock();
        if state.refreshing {
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            tracing::debug!(queued = state.waiters.len(), "Queued request behind token refresh");
            Ticket::Follower(receiver)
        } else {
            state.refreshing = true;
            Ticket::Leader(RefreshLease {
                coordinator: self,
                settled: false,
            })
        }
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    /// Number of requests waiting on the current refresh.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }

    fn settle(&self, outcome: &Result<(), ApiError>) {
        let waiters = {
            let mut state = self.lock();
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            // The waiting request may have been dropped
            let _ = waiter.send(outcome.clone());
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held by the leader for the duration of a refresh.
///
/// Dropping an unsettled lease fails every queued request, so a cancelled
/// leader never strands its followers.
#[derive(Debug)]
pub struct RefreshLease<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshLease<'_> {
    /// Release the queue with the refresh outcome, in FIFO order.
    pub fn settle(mut self, outcome: &Result<(), ApiError>) {
        self.settled = true;
        self.coordinator.settle(outcome);
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Token refresh abandoned, failing queued requests");
            self.coordinator.settle(&Err(ApiError::SessionExpired(
                "token refresh was cancelled".to_string(),
            )));
        }
    }
}
