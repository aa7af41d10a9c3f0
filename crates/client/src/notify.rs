//! User-facing notices raised by the HTTP pipeline.

/// A notice for the user, raised at the point a failure is intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// A request got no response.
    NetworkError,
    /// The session expired and could not be refreshed.
    Unauthorized,
}

impl Notice {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NetworkError => "Unable to reach the server. Check your connection.",
            Self::Unauthorized => "Your session has expired. Please log in again.",
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Sink for [`Notice`]s (a toast in a UI, a log line in a CLI).
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        tracing::warn!(?notice, "{}", notice.message());
    }
}
