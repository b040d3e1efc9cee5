//! Application state shared across handlers

use crate::auth::AuthService;
use crate::middleware::RateLimiter;
use rehearsal_core::{AppConfig, CredentialRepository};
use std::sync::Arc;
use std::time::Instant;

/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Authentication service (owns the credential store handle)
    pub auth: AuthService,
    /// Per-client request limiter
    pub rate_limiter: Arc<RateLimiter>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, auth: AuthService) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Self {
            config: Arc::new(config),
            auth,
            rate_limiter,
            start_time: Instant::now(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialRepository> {
        self.auth.store()
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
