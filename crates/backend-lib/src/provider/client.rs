// ============================
// callverify backend-lib/src/provider/client.rs
// ============================
//! HTTP client for the provider's "start inbound call waiting" method.
use std::sync::Arc;

use callverify_common::{CallDetails, ProviderResponse, StartCallRequest, START_METHOD, STATUS_SUCCESS};
use metrics::counter;
use reqwest::header::CONTENT_TYPE;

use super::retry::RetryPolicy;
use crate::auth::generate_auth_token;
use crate::clock::Clock;
use crate::config::Settings;
use crate::error::AppError;
use crate::metrics as keys;
use crate::validation::{mask_phone, validate_call_id};

/// A verification the provider accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescriptor {
    /// Correlation key for the callback and for polling
    pub call_id: String,
    /// Everything the provider returned about the call
    pub details: CallDetails,
}

/// Provider API client.
#[derive(Clone)]
pub struct VerificationClient {
    http: reqwest::Client,
    base_url: String,
    access_key: String,
    signature_key: String,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl VerificationClient {
    pub fn new(settings: &Settings, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(settings.provider_timeout())
            .build()
            .map_err(|e| AppError::Internal(format!("Cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: settings.provider.base_url.trim_end_matches('/').to_string(),
            access_key: settings.access_key.clone(),
            signature_key: settings.signature_key.clone(),
            retry: RetryPolicy::with_retries(settings.provider.connect_retries),
            clock,
        })
    }

    /// Ask the provider to wait for a call from `phone_number`.
    ///
    /// The provider posts to `callback_url` once the call arrives. Any answer
    /// other than `status == "success"` with a non-empty `callId` is an error.
    pub async fn start(
        &self,
        phone_number: &str,
        callback_url: &str,
        timeout_secs: u32,
    ) -> Result<SessionDescriptor, AppError> {
        let payload = StartCallRequest {
            client_number: phone_number.to_string(),
            callback_link: callback_url.to_string(),
            timeout: timeout_secs,
        };
        // The signature covers these exact bytes, so serialize once
        let body = serde_json::to_string(&payload)?;
        let url = format!("{}/{START_METHOD}", self.base_url);

        tracing::debug!(phone = %mask_phone(phone_number), %url, "Starting call verification");

        let this = self;
        let (url, body) = (url.as_str(), body.as_str());
        let response = self
            .retry
            .execute(move || this.send(url, body), reqwest::Error::is_connect)
            .await
            .map_err(transport_error)?;

        let http_status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;

        let parsed: ProviderResponse = match serde_json::from_slice(&bytes) {
            Ok(parsed) => parsed,
            Err(e) if !http_status.is_success() => {
                return Err(provider_failure(format!("Provider answered HTTP {http_status}: {e}")));
            },
            Err(e) => {
                return Err(provider_failure(format!("Malformed provider response: {e}")));
            },
        };

        if parsed.status != STATUS_SUCCESS {
            let reason = parsed.data.and_then(|d| d.result);
            tracing::warn!(status = %parsed.status, ?reason, "Provider rejected verification");
            counter!(keys::VERIFICATION_REJECTED).increment(1);
            return Err(AppError::ProviderRejected {
                status: parsed.status,
                reason,
            });
        }

        if !http_status.is_success() {
            return Err(provider_failure(format!(
                "Provider answered HTTP {http_status} with a success envelope"
            )));
        }

        let details = parsed
            .data
            .and_then(|d| d.call_details)
            .ok_or_else(|| provider_failure("Provider success response lacks callDetails".to_string()))?;

        if details.call_id.is_empty() {
            return Err(provider_failure(
                "Provider success response lacks callId".to_string(),
            ));
        }
        if let Err(e) = validate_call_id(&details.call_id) {
            return Err(provider_failure(format!("Provider returned an unusable callId: {e}")));
        }

        Ok(SessionDescriptor {
            call_id: details.call_id.clone(),
            details,
        })
    }

    async fn send(&self, url: &str, body: &str) -> Result<reqwest::Response, reqwest::Error> {
        // Fresh timestamp per attempt
        let token = generate_auth_token(
            START_METHOD,
            self.clock.now(),
            &self.access_key,
            body,
            &self.signature_key,
        );

        self.http
            .post(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_owned())
            .send()
            .await
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    let message = if err.is_timeout() {
        format!("Provider request timed out: {err}")
    } else if err.is_connect() {
        format!("Cannot connect to provider: {err}")
    } else {
        err.to_string()
    };
    provider_failure(message)
}

fn provider_failure(message: String) -> AppError {
    tracing::error!(error = %message, "Provider call failed");
    counter!(keys::PROVIDER_TRANSPORT_ERROR).increment(1);
    AppError::Transport(message)
}
