// ============================
// callverify backend-lib/src/lib.rs
// ============================
//! Core functionality for the missed-call phone verification server.
//!
//! A client asks to verify a number (`action=start`), the provider waits for
//! a call from it and reports back (`action=callback`), and the client polls
//! for the result (`action=check`).

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod provider;
pub mod router;
pub mod storage;
pub mod validation;
pub mod verification;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::AppError;
use crate::middleware::RateLimiter;
use crate::provider::VerificationClient;
use crate::storage::SessionStore;
use crate::verification::VerificationService;

/// Application state shared across all handlers
pub struct AppState<S> {
    /// Verification state machine
    pub verification: Arc<VerificationService<S>>,
    /// Settings the server was started with
    pub settings: Arc<Settings>,
    /// Rate limiter for verification starts
    pub rate_limiter: Arc<RateLimiter>,
}

impl<S: SessionStore + 'static> AppState<S> {
    /// Create a new application state on the system clock
    pub fn new(store: S, settings: Settings) -> Result<Self, AppError> {
        Self::with_clock(store, settings, Arc::new(SystemClock))
    }

    /// Create a new application state with an explicit time source
    pub fn with_clock(store: S, settings: Settings, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        settings.validate()?;

        let client = VerificationClient::new(&settings, Arc::clone(&clock))?;
        let verification = Arc::new(VerificationService::new(store, client, clock, &settings));
        let rate_limiter = Arc::new(RateLimiter::new(
            settings.rate_limit_window(),
            settings.rate_limit.max_requests,
        ));

        Ok(Self {
            verification,
            settings: Arc::new(settings),
            rate_limiter,
        })
    }

    /// Periodically purge stale sessions and idle rate-limit entries.
    ///
    /// Runs until the returned task is aborted. Failures are logged and the
    /// next tick tries again.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let verification = Arc::clone(&self.verification);
        let rate_limiter = Arc::clone(&self.rate_limiter);
        let period = self.settings.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = verification.purge_stale().await {
                    tracing::error!(error = %e, "Session sweep failed");
                }
                rate_limiter.prune();
            }
        })
    }
}
