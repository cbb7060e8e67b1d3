//! Token REST provider configuration.

use std::time::Duration;
use url::Url;

/// Configuration for the token-based REST provider.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL of the calendar API.
    pub base_url: Url,

    /// Bearer token presented on every request.
    pub token: String,

    /// Bounded request timeout.
    pub timeout: Duration,

    /// User agent string.
    pub user_agent: String,
}

impl RestConfig {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Creates a new REST configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid.
    pub fn new(base_url: impl AsRef<str>, token: impl Into<String>) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(base_url.as_ref())?;
        Ok(Self {
            base_url: parsed,
            token: token.into(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("openslot/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL without a trailing slash.
    pub fn base_str(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }
}
