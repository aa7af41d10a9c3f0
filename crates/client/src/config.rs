//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `GATEHOUSE_API_URL` - Base URL of the dashboard API
//!
//! ## Optional
//! - `GATEHOUSE_TIMEOUT_SECS` - Per-request timeout in seconds (default: 10)
//! - `GATEHOUSE_SESSION_DIR` - Directory for the file token store (default: .gatehouse)
//! - `GATEHOUSE_CHANNEL` - Cross-tab broadcast channel name (default: auth-events)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SESSION_DIR: &str = ".gatehouse";
const DEFAULT_CHANNEL: &str = "auth-events";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Paths of the authentication endpoints, relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login: String,
    pub refresh: String,
    pub me: String,
    pub logout: String,
    pub change_password: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            refresh: "/auth/refresh-token".to_string(),
            me: "/auth/me".to_string(),
            logout: "/auth/logout".to_string(),
            change_password: "/auth/change-password".to_string(),
        }
    }
}

/// Session client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every request path is appended to
    pub api_url: Url,
    /// Timeout applied to each HTTP call
    pub timeout: Duration,
    /// Authentication endpoint paths
    pub endpoints: Endpoints,
    /// Directory holding the file-backed token store
    pub session_dir: PathBuf,
    /// Name of the cross-tab broadcast channel
    pub channel_name: String,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "production")
    pub sentry_environment: Option<String>,
}

impl ClientConfig {
    /// Configuration with defaults for everything except the API URL.
    #[must_use]
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            endpoints: Endpoints::default(),
            session_dir: PathBuf::from(DEFAULT_SESSION_DIR),
            channel_name: DEFAULT_CHANNEL.to_string(),
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url = lookup("GATEHOUSE_API_URL")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("GATEHOUSE_API_URL".to_string()))?;
        let api_url = Url::parse(raw_url.trim()).map_err(|e| {
            ConfigError::InvalidEnvVar("GATEHOUSE_API_URL".to_string(), e.to_string())
        })?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEnvVar(
                "GATEHOUSE_API_URL".to_string(),
                format!("unsupported scheme '{}'", api_url.scheme()),
            ));
        }

        let timeout_secs = lookup("GATEHOUSE_TIMEOUT_SECS")
            .map_or(Ok(DEFAULT_TIMEOUT_SECS), |value| value.trim().parse::<u64>())
            .map_err(|e| {
                ConfigError::InvalidEnvVar("GATEHOUSE_TIMEOUT_SECS".to_string(), e.to_string())
            })?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "GATEHOUSE_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            timeout: Duration::from_secs(timeout_secs),
            session_dir: lookup("GATEHOUSE_SESSION_DIR")
                .map_or_else(|| PathBuf::from(DEFAULT_SESSION_DIR), PathBuf::from),
            channel_name: lookup("GATEHOUSE_CHANNEL")
                .unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
            sentry_dsn: lookup("SENTRY_DSN"),
            sentry_environment: lookup("SENTRY_ENVIRONMENT"),
            ..Self::new(api_url)
        })
    }

    /// Whether `path` addresses the login or refresh endpoint.
    ///
    /// Both sides are resolved first, so `auth/login`, `/auth/login?x=1` and
    /// an absolute URL to the same place all match. A 401 from either
    /// endpoint never triggers a token refresh.
    #[must_use]
    pub fn is_auth_endpoint(&self, path: &str) -> bool {
        let Ok(target) = self.resolve(path) else {
            return false;
        };
        [&self.endpoints.login, &self.endpoints.refresh]
            .into_iter()
            .filter_map(|endpoint| self.resolve(endpoint).ok())
            .any(|endpoint| {
                endpoint.origin() == target.origin()
                    && endpoint.path().trim_end_matches('/') == target.path().trim_end_matches('/')
            })
    }

    /// Resolve a request path against the API base URL.
    ///
    /// Paths are appended to the base (so a base of `https://host/api` and a
    /// path of `/auth/me` give `https://host/api/auth/me`); absolute URLs are
    /// used as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if the result is not a valid URL.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path);
        }
        let base = self.api_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            ClientConfig::from_lookup(lookup(&[("GATEHOUSE_API_URL", "https://api.example.com")]))
                .unwrap();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.channel_name, "auth-events");
        assert_eq!(config.session_dir, PathBuf::from(".gatehouse"));
        assert_eq!(config.endpoints, Endpoints::default());
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn test_missing_api_url() {
        let err = ClientConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "GATEHOUSE_API_URL"));
    }

    #[test]
    fn test_invalid_values() {
        let err = ClientConfig::from_lookup(lookup(&[("GATEHOUSE_API_URL", "not a url")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));

        let err = ClientConfig::from_lookup(lookup(&[("GATEHOUSE_API_URL", "ftp://host")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));

        let err = ClientConfig::from_lookup(lookup(&[
            ("GATEHOUSE_API_URL", "https://api.example.com"),
            ("GATEHOUSE_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref key, _) if key == "GATEHOUSE_TIMEOUT_SECS"));

        let err = ClientConfig::from_lookup(lookup(&[
            ("GATEHOUSE_API_URL", "https://api.example.com"),
            ("GATEHOUSE_TIMEOUT_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("GATEHOUSE_API_URL", "https://api.example.com"),
            ("GATEHOUSE_TIMEOUT_SECS", "3"),
            ("GATEHOUSE_SESSION_DIR", "/tmp/sessions"),
            ("GATEHOUSE_CHANNEL", "auth-staging"),
        ]))
        .unwrap();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.session_dir, PathBuf::from("/tmp/sessions"));
        assert_eq!(config.channel_name, "auth-staging");
    }

    #[test]
    fn test_resolve_appends_to_base_path() {
        let config = ClientConfig::new(Url::parse("https://host/api/").unwrap());
        assert_eq!(
            config.resolve("/auth/me").unwrap().as_str(),
            "https://host/api/auth/me"
        );
        assert_eq!(
            config.resolve("https://other/x").unwrap().as_str(),
            "https://other/x"
        );
    }

    #[test]
    fn test_auth_endpoint_detection() {
        let config = ClientConfig::new(Url::parse("https://host/api").unwrap());
        assert!(config.is_auth_endpoint("/auth/login"));
        assert!(config.is_auth_endpoint("auth/login"));
        assert!(config.is_auth_endpoint("/auth/login/"));
        assert!(config.is_auth_endpoint("/auth/refresh-token?x=1"));
        assert!(config.is_auth_endpoint("https://host/api/auth/refresh-token"));
        assert!(!config.is_auth_endpoint("/auth/me"));
        assert!(!config.is_auth_endpoint("/auth/login-history"));
        assert!(!config.is_auth_endpoint("https://other/api/auth/login"));
    }
}
