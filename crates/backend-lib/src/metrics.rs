// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const VERIFICATION_STARTED: &str = "verification.started";
pub const VERIFICATION_REJECTED: &str = "verification.rejected";
pub const VERIFICATION_CONFIRMED: &str = "verification.confirmed";
pub const VERIFICATION_CHECKED: &str = "verification.checked";
pub const VERIFICATION_UNKNOWN_SESSION: &str = "verification.unknown_session";
pub const PROVIDER_TRANSPORT_ERROR: &str = "provider.transport_error";
pub const SESSIONS_PURGED: &str = "sessions.purged";
pub const CALLBACK_UNAUTHORIZED: &str = "callback.unauthorized";
pub const RATE_LIMITED: &str = "http.rate_limited";
