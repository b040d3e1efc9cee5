//! Per-client rate limiting
//!
//! Token bucket keyed by client IP. Each bucket holds `max_requests` tokens
//! and refills continuously over `window_secs`, so a client gets at most
//! `max_requests` requests per window in sustained use.
//!
//! Clients are keyed on the peer address unless `trust_proxy` is set, in
//! which case the first `X-Forwarded-For` hop (or `X-Real-IP`) wins.

use crate::audit::{extract_ip_address, ClientIp};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use rehearsal_core::RateLimitConfig;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Upper bound on tracked buckets
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Minimum time between sweeps of idle buckets
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared bucket for new clients while the table is full
const OVERFLOW_KEY: &str = "overflow";

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
struct Buckets {
    entries: HashMap<String, Bucket>,
    last_prune: Instant,
}

/// In-memory token bucket rate limiter
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
    capacity: f64,
    refill_per_sec: f64,
    max_clients: usize,
    trust_proxy: bool,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.max_requests.max(1));
        let window = config.window_secs.max(1) as f64;
        Self {
            buckets: Mutex::new(Buckets {
                entries: HashMap::new(),
                last_prune: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity / window,
            max_clients: MAX_TRACKED_CLIENTS,
            trust_proxy: config.trust_proxy,
        }
    }

    /// Take one token for `key`.
    ///
    /// Returns `Err(retry_after)` when the bucket is empty.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut guard = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let buckets = &mut *guard;

        let mut key = key;
        if !buckets.entries.contains_key(key) && buckets.entries.len() >= self.max_clients {
            if now.saturating_duration_since(buckets.last_prune) >= PRUNE_INTERVAL {
                let full_after = self.capacity / self.refill_per_sec;
                buckets.entries.retain(|_, b| {
                    now.saturating_duration_since(b.last_refill).as_secs_f64() < full_after
                });
                buckets.last_prune = now;
            }
            if buckets.entries.len() >= self.max_clients {
                key = OVERFLOW_KEY;
            }
        }

        let capacity = self.capacity;
        let bucket = buckets
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                tokens: capacity,
                last_refill: now,
            });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let wait = (1.0 - bucket.tokens) / self.refill_per_sec;
            Err(Duration::from_secs_f64(wait.ceil().max(1.0)))
        }
    }

    /// Number of tracked clients
    pub fn tracked_clients(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// Resolve the address a request is accounted to
    pub fn client_ip(&self, request: &Request<Body>) -> Option<String> {
        let forwarded = if self.trust_proxy {
            extract_ip_address(request.headers())
        } else {
            None
        };

        forwarded.or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
    }
}

/// Rate limiting middleware
///
/// Records the resolved address as a [`ClientIp`] extension for handlers.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let client_ip = state.rate_limiter.client_ip(&request);
    let key = client_ip.as_deref().unwrap_or("unknown").to_string();

    match state.rate_limiter.check(&key) {
        Ok(()) => {
            if let Some(ip) = client_ip {
                request.extensions_mut().insert(ClientIp(ip));
            }
            next.run(request).await
        }
        Err(retry_after) => {
            tracing::warn!(client = %key, retry_after_secs = retry_after.as_secs(), "rate limit exceeded");
            let mut response = AppError::TooManyRequests.into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}
