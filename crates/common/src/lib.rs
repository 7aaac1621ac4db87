// ================
// common/src/lib.rs
// ================
//! Wire types shared between the verification server, its clients and the
//! call-verification provider.
//!
//! Field names follow the provider's camelCase JSON contract.

use serde::{Deserialize, Serialize};

/// Provider method name for starting an inbound-call verification.
pub const START_METHOD: &str = "call-verification/start-inbound-call-waiting";

/// Status string the provider reports on a successful request.
pub const STATUS_SUCCESS: &str = "success";

/// Body of the outbound "start verification" request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartCallRequest {
    /// Number the provider should expect a call from
    pub client_number: String,
    /// Where the provider posts the confirmation
    pub callback_link: String,
    /// Verification window in seconds
    pub timeout: u32,
}

/// Top-level provider response envelope.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProviderResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<ProviderData>,
}

/// `data` member of the provider envelope.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderData {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub call_details: Option<CallDetails>,
}

/// Call details returned by the provider and relayed verbatim to the client,
/// which uses them to render the confirmation UI (number to dial, QR code).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallDetails {
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub callback_link: String,
    #[serde(default)]
    pub client_number: String,
    #[serde(default)]
    pub confirmation_number: String,
    #[serde(default)]
    pub is_mnp: bool,
    #[serde(default)]
    pub operator_name: String,
    #[serde(default)]
    pub operator_name_mnp: serde_json::Value,
    #[serde(default)]
    pub region_name: String,
    #[serde(default)]
    pub qr_code_uri: String,
    #[serde(default)]
    pub user_data: serde_json::Value,
}

/// Form body of `?action=start`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StartForm {
    pub phone_number: String,
}

/// Form body of `?action=check`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CheckForm {
    pub call_id: String,
}

/// JSON body the provider posts to `?action=callback`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub call_id: String,
}

/// Reply to `?action=check`.
///
/// `timeout` is the number of seconds left in the verification window and
/// goes negative once the window has elapsed. `flag` reports confirmation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResponse {
    pub timeout: i64,
    pub flag: bool,
}
