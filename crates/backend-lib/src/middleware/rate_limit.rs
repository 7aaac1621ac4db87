//! Per-client fixed-window rate limiting for `action=start`.
//!
//! Every start makes the provider place a call, so it is the one action worth
//! throttling. Polling and provider callbacks pass through untouched.
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use metrics::counter;

use crate::error::AppError;
use crate::metrics as keys;
use crate::router::ActionParams;
use crate::storage::SessionStore;
use crate::AppState;

/// Rate limit entry for a client
#[derive(Debug)]
struct RateLimitEntry {
    requests: u32,
    window_start: Instant,
}

/// Fixed-window request counter keyed by client address
#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            entries: DashMap::new(),
            window,
            max_requests,
        }
    }

    /// Count one request from `client`, failing once the window is full.
    pub fn check(&self, client: &str) -> Result<(), AppError> {
        let mut entry = self
            .entries
            .entry(client.to_string())
            .or_insert_with(|| RateLimitEntry {
                requests: 0,
                window_start: Instant::now(),
            });

        if entry.window_start.elapsed() >= self.window {
            entry.requests = 0;
            entry.window_start = Instant::now();
        }

        if entry.requests >= self.max_requests {
            return Err(AppError::RateLimitExceeded);
        }

        entry.requests += 1;
        Ok(())
    }

    /// Drop entries whose window has passed.
    pub fn prune(&self) {
        self.entries
            .retain(|_, entry| entry.window_start.elapsed() < self.window);
    }
}

/// Rate limiter middleware
pub async fn rate_limit<S: SessionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    // Decoded the same way the dispatcher decodes it
    let is_start = Query::<ActionParams>::try_from_uri(request.uri())
        .is_ok_and(|Query(params)| params.action.as_deref() == Some("start"));

    if is_start {
        let client = client_ip(request.headers());
        if let Err(e) = state.rate_limiter.check(&client) {
            counter!(keys::RATE_LIMITED).increment(1);
            tracing::warn!(%client, "Rate limit exceeded for verification start");
            return Err(e);
        }
    }

    Ok(next.run(request).await)
}

/// Client address as reported by the fronting proxy.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|v| v.split(',').next())
        })
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("unknown")
        .to_string()
}
