// ============================
// crates/backend-lib/src/auth/token.rs
// ============================
/** Provider request signing.
The provider authenticates API calls with a bearer token that binds the
method name, issue time and exact request body to the shared signature key,
without the key itself ever leaving this process. */
use sha2::{Digest, Sha256};

/** Build the bearer token for a provider API call.
# Arguments
* `method` - Provider method path, e.g. `call-verification/start-inbound-call-waiting`
* `timestamp` - Unix time in seconds the request is issued at
* `access_key` - Public half of the API credentials
* `params` - The serialized request body, byte-for-byte as sent
* `signature_key` - Secret half of the API credentials
# Returns
`access_key || timestamp || hex(sha256(method \n timestamp \n access_key \n params \n signature_key))` */
pub fn generate_auth_token(
    method: &str,
    timestamp: i64,
    access_key: &str,
    params: &str,
    signature_key: &str,
) -> String {
    let timestamp = timestamp.to_string();
    let signed = [method, timestamp.as_str(), access_key, params, signature_key].join("\n");
    let digest = Sha256::digest(signed.as_bytes());
    format!("{access_key}{timestamp}{}", hex::encode(digest))
}
