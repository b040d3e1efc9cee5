//! Client configuration

use std::time::Duration;

/// API base URL used when none is configured
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// How often an authenticated session renews its access token.
///
/// Shorter than the 15-minute access token lifetime.
pub const SESSION_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API server, without trailing slash
    pub api_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}
