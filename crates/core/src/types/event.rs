//! Session lifecycle events shared between tabs.

use serde::{Deserialize, Serialize};

/// Signal published to sibling tabs when the session changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionEvent {
    LoggedIn,
    LoggedOut,
}

impl SessionEvent {
    /// Wire form used on the broadcast channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoggedIn => "logged-in",
            Self::LoggedOut => "logged-out",
        }
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logged-in" => Ok(Self::LoggedIn),
            "logged-out" => Ok(Self::LoggedOut),
            _ => Err(format!("unknown session event: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&SessionEvent::LoggedIn).unwrap(),
            "\"logged-in\""
        );
        assert_eq!(
            "logged-out".parse::<SessionEvent>().unwrap(),
            SessionEvent::LoggedOut
        );
        assert!("logged-sideways".parse::<SessionEvent>().is_err());
    }
}
