// ============================
// callverify backend-lib/src/verification.rs
// ============================
//! Verification session state machine.
//!
//! A session moves NONE -> PENDING -> CONFIRMED. `start` creates the PENDING
//! record once the provider accepts the request, `callback` confirms it and
//! `check` reports it. No session state is cached here: every operation
//! round-trips through the store, which keeps multiple server instances
//! sharing one store consistent.
use std::sync::Arc;

use callverify_common::{CallDetails, CheckResponse};
use metrics::counter;

use crate::auth::{callback_token, verify_callback_token};
use crate::clock::Clock;
use crate::config::Settings;
use crate::error::AppError;
use crate::metrics as keys;
use crate::provider::VerificationClient;
use crate::storage::{SessionRecord, SessionStore};
use crate::validation::{mask_phone, validate_call_id, validate_phone_number};

/// Outcome of polling a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationStatus {
    /// Seconds until the window closes; negative once it has closed
    pub seconds_remaining: i64,
    pub confirmed: bool,
}

impl VerificationStatus {
    /// The window closed without a confirmation. This is final.
    pub fn timed_out(&self) -> bool {
        !self.confirmed && self.seconds_remaining <= 0
    }
}

impl From<VerificationStatus> for CheckResponse {
    fn from(status: VerificationStatus) -> Self {
        CheckResponse {
            timeout: status.seconds_remaining,
            flag: status.confirmed,
        }
    }
}

/// Ties the provider client and the session store together.
pub struct VerificationService<S> {
    store: S,
    client: VerificationClient,
    clock: Arc<dyn Clock>,
    timeout_secs: u32,
    retention_secs: i64,
    callback_token: String,
}

impl<S: SessionStore> VerificationService<S> {
    pub fn new(store: S, client: VerificationClient, clock: Arc<dyn Clock>, settings: &Settings) -> Self {
        Self {
            store,
            client,
            clock,
            timeout_secs: settings.timeout_secs,
            retention_secs: i64::try_from(settings.retention.retention_secs).unwrap_or(i64::MAX),
            callback_token: callback_token(&settings.access_key, &settings.signature_key),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Callback URL handed to the provider for a server reachable at `base_url`.
    pub fn callback_link(&self, base_url: &str) -> String {
        format!(
            "{}/?action=callback&token={}",
            base_url.trim_end_matches('/'),
            self.callback_token
        )
    }

    /// Reject callbacks that do not carry this deployment's callback token.
    pub fn authorize_callback(&self, presented: Option<&str>) -> Result<(), AppError> {
        match presented {
            Some(token) if verify_callback_token(&self.callback_token, token) => Ok(()),
            _ => {
                counter!(keys::CALLBACK_UNAUTHORIZED).increment(1);
                tracing::warn!("Rejected callback with missing or invalid token");
                Err(AppError::Auth("Invalid callback token".to_string()))
            },
        }
    }

    /// Start a verification for `phone_number`.
    ///
    /// Returns the provider's call details for the client to display. A
    /// PENDING session is recorded only if the provider accepted the request.
    pub async fn start(&self, phone_number: &str, base_url: &str) -> Result<CallDetails, AppError> {
        let phone_number = validate_phone_number(phone_number)?;
        let callback_link = self.callback_link(base_url);

        let descriptor = self
            .client
            .start(&phone_number, &callback_link, self.timeout_secs)
            .await?;

        let expires_at = self.clock.now() + i64::from(self.timeout_secs);
        self.store
            .put(&descriptor.call_id, SessionRecord::pending(expires_at))
            .await?;

        counter!(keys::VERIFICATION_STARTED).increment(1);
        tracing::info!(
            call_id = %descriptor.call_id,
            phone = %mask_phone(&phone_number),
            expires_at,
            "Verification started"
        );

        Ok(descriptor.details)
    }

    /// Report how a session stands.
    pub async fn check(&self, call_id: &str) -> Result<VerificationStatus, AppError> {
        let call_id = validate_call_id(call_id)?;
        let record = self.load(call_id).await?;

        let status = VerificationStatus {
            seconds_remaining: record.expires_at.saturating_sub(self.clock.now()),
            confirmed: record.confirmed,
        };

        counter!(keys::VERIFICATION_CHECKED).increment(1);
        tracing::debug!(
            call_id,
            seconds_remaining = status.seconds_remaining,
            confirmed = status.confirmed,
            "Verification checked"
        );

        Ok(status)
    }

    /// Apply the provider's confirmation for `call_id`.
    ///
    /// The expiry recorded at start is kept. Confirming twice is a no-op, and
    /// a session removed by the sweeper is not brought back.
    pub async fn callback(&self, call_id: &str) -> Result<(), AppError> {
        let call_id = validate_call_id(call_id)?;
        match self.store.confirm(call_id).await? {
            None => {
                counter!(keys::VERIFICATION_UNKNOWN_SESSION).increment(1);
                tracing::error!(call_id, "Provider confirmed a session that was never started");
                Err(AppError::SessionNotFound(call_id.to_string()))
            },
            Some(previous) if previous.confirmed => {
                tracing::debug!(call_id, "Duplicate confirmation ignored");
                Ok(())
            },
            Some(_) => {
                counter!(keys::VERIFICATION_CONFIRMED).increment(1);
                tracing::info!(call_id, "Verification confirmed");
                Ok(())
            },
        }
    }

    /// Delete sessions whose window closed more than the retention period ago.
    pub async fn purge_stale(&self) -> Result<usize, AppError> {
        let cutoff = self.clock.now().saturating_sub(self.retention_secs);
        let removed = self.store.purge_expired(cutoff).await?;
        if removed > 0 {
            counter!(keys::SESSIONS_PURGED).increment(removed as u64);
            tracing::info!(removed, cutoff, "Purged stale sessions");
        }
        Ok(removed)
    }

    async fn load(&self, call_id: &str) -> Result<SessionRecord, AppError> {
        self.store.get(call_id).await?.ok_or_else(|| {
            counter!(keys::VERIFICATION_UNKNOWN_SESSION).increment(1);
            AppError::SessionNotFound(call_id.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::RedbSessionStore;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const START: i64 = 1_700_000_000;

    struct Harness {
        service: VerificationService<RedbSessionStore>,
        clock: ManualClock,
        _server: MockServer,
        _dir: TempDir,
    }

    async fn harness(provider_reply: serde_json::Value) -> Harness {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/call-verification/start-inbound-call-waiting"))
            .respond_with(ResponseTemplate::new(200).set_body_json(provider_reply))
            .mount(&server)
            .await;

        let mut settings = Settings {
            access_key: "access".to_string(),
            signature_key: "secret".to_string(),
            ..Settings::default()
        };
        settings.provider.base_url = server.uri();
        settings.retention.retention_secs = 100;

        let dir = TempDir::new().unwrap();
        let store = RedbSessionStore::open(dir.path().join("sessions.redb")).unwrap();
        let clock = ManualClock::new(START);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let client = VerificationClient::new(&settings, Arc::clone(&shared)).unwrap();

        Harness {
            service: VerificationService::new(store, client, shared, &settings),
            clock,
            _server: server,
            _dir: dir,
        }
    }

    fn accepted(call_id: &str) -> serde_json::Value {
        json!({
            "status": "success",
            "data": {"result": "success", "callDetails": {"callId": call_id, "confirmationNumber": "+78005553535"}}
        })
    }

    #[tokio::test]
    async fn test_start_then_check_is_pending() {
        let h = harness(accepted("ABC123")).await;

        let details = h.service.start("+15551234567", "http://localhost:8080").await.unwrap();
        assert_eq!(details.call_id, "ABC123");
        assert_eq!(details.confirmation_number, "+78005553535");

        let status = h.service.check("ABC123").await.unwrap();
        assert!(!status.confirmed);
        assert!(status.seconds_remaining > 0 && status.seconds_remaining <= 60);
        assert_eq!(
            h.service.store().get("ABC123").await.unwrap(),
            Some(SessionRecord::pending(START + 60))
        );
    }

    #[tokio::test]
    async fn test_full_scenario() {
        let h = harness(accepted("ABC123")).await;
        h.service.start("+15551234567", "http://localhost:8080").await.unwrap();

        h.clock.advance(10);
        let status = h.service.check("ABC123").await.unwrap();
        assert_eq!(status, VerificationStatus { seconds_remaining: 50, confirmed: false });
        assert_eq!(CheckResponse::from(status), CheckResponse { timeout: 50, flag: false });

        h.service.callback("ABC123").await.unwrap();
        assert_eq!(
            h.service.store().get("ABC123").await.unwrap(),
            Some(SessionRecord { expires_at: START + 60, confirmed: true })
        );

        h.clock.advance(5);
        let status = h.service.check("ABC123").await.unwrap();
        assert_eq!(status, VerificationStatus { seconds_remaining: 45, confirmed: true });
    }

    #[tokio::test]
    async fn test_callback_is_idempotent() {
        let h = harness(accepted("ABC123")).await;
        h.service.start("+15551234567", "http://localhost:8080").await.unwrap();

        h.service.callback("ABC123").await.unwrap();
        h.service.callback("ABC123").await.unwrap();

        let record = h.service.store().get("ABC123").await.unwrap().unwrap();
        assert!(record.confirmed);
        assert_eq!(record.expires_at, START + 60);
    }

    #[tokio::test]
    async fn test_confirmed_survives_expiry() {
        let h = harness(accepted("ABC123")).await;
        h.service.start("+15551234567", "http://localhost:8080").await.unwrap();
        h.service.callback("ABC123").await.unwrap();

        h.clock.advance(90);
        let status = h.service.check("ABC123").await.unwrap();
        assert!(status.confirmed);
        assert_eq!(status.seconds_remaining, -30);
        assert!(!status.timed_out());
    }

    #[tokio::test]
    async fn test_unconfirmed_past_expiry_is_timed_out() {
        let h = harness(accepted("ABC123")).await;
        h.service.start("+15551234567", "http://localhost:8080").await.unwrap();

        h.clock.advance(60);
        let status = h.service.check("ABC123").await.unwrap();
        assert_eq!(status.seconds_remaining, 0);
        assert!(status.timed_out());
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let h = harness(accepted("ABC123")).await;

        assert!(matches!(
            h.service.check("NEVER").await,
            Err(AppError::SessionNotFound(_))
        ));
        assert!(matches!(
            h.service.callback("NEVER").await,
            Err(AppError::SessionNotFound(_))
        ));
        // The failed callback must not have created a record
        assert_eq!(h.service.store().get("NEVER").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejected_start_records_nothing() {
        let h = harness(json!({"status": "error", "data": {"result": "denied", "callDetails": {"callId": "ABC123"}}})).await;

        let err = h.service.start("+15551234567", "http://localhost:8080").await.unwrap_err();
        assert!(matches!(err, AppError::ProviderRejected { .. }));
        assert_eq!(h.service.store().get("ABC123").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_before_provider_call() {
        let h = harness(accepted("ABC123")).await;

        assert!(matches!(
            h.service.start("not-a-number", "http://localhost:8080").await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            h.service.check("").await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_callback_link_carries_token() {
        let h = harness(accepted("ABC123")).await;
        let link = h.service.callback_link("http://example.org/");
        let token = callback_token("access", "secret");

        assert_eq!(link, format!("http://example.org/?action=callback&token={token}"));
        assert!(h.service.authorize_callback(Some(&token)).is_ok());
        assert!(matches!(
            h.service.authorize_callback(Some("forged")),
            Err(AppError::Auth(_))
        ));
        assert!(h.service.authorize_callback(None).is_err());
    }

    #[tokio::test]
    async fn test_opaque_call_id_round_trips() {
        let h = harness(accepted("call.42:xyz")).await;

        let details = h.service.start("+15551234567", "http://localhost:8080").await.unwrap();
        assert_eq!(details.call_id, "call.42:xyz");

        assert!(!h.service.check("call.42:xyz").await.unwrap().confirmed);
        h.service.callback("call.42:xyz").await.unwrap();
        assert!(h.service.check("call.42:xyz").await.unwrap().confirmed);
    }

    #[tokio::test]
    async fn test_callback_after_purge_is_not_found() {
        let h = harness(accepted("ABC123")).await;
        h.service.start("+15551234567", "http://localhost:8080").await.unwrap();

        h.clock.set(START + 60 + 101);
        assert_eq!(h.service.purge_stale().await.unwrap(), 1);

        assert!(matches!(
            h.service.callback("ABC123").await,
            Err(AppError::SessionNotFound(_))
        ));
        assert_eq!(h.service.store().get("ABC123").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_check_saturates_on_extreme_expiry() {
        let h = harness(accepted("ABC123")).await;
        h.service
            .store()
            .put("ancient", SessionRecord::pending(i64::MIN))
            .await
            .unwrap();

        let status = h.service.check("ancient").await.unwrap();
        assert_eq!(status.seconds_remaining, i64::MIN);
        assert!(status.timed_out());
    }

    #[tokio::test]
    async fn test_purge_stale_respects_retention() {
        let h = harness(accepted("ABC123")).await;
        h.service.start("+15551234567", "http://localhost:8080").await.unwrap();

        // Expired 100s ago: exactly at the retention boundary, kept
        h.clock.set(START + 60 + 100);
        assert_eq!(h.service.purge_stale().await.unwrap(), 0);
        assert!(h.service.check("ABC123").await.is_ok());

        h.clock.advance(1);
        assert_eq!(h.service.purge_stale().await.unwrap(), 1);
        assert!(matches!(
            h.service.check("ABC123").await,
            Err(AppError::SessionNotFound(_))
        ));
    }
}
