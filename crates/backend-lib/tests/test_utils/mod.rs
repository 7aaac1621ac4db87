//! Test utilities shared by the integration tests
//!
//! Builds a full application state against a wiremock provider, a temporary
//! redb database and a manual clock.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use backend_lib::{
    clock::{Clock, ManualClock},
    config::Settings,
    router::create_router,
    storage::RedbSessionStore,
    AppState,
};
use redb::{Database, TableDefinition};
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const START: i64 = 1_700_000_000;
pub const ACCESS_KEY: &str = "test-access";
pub const SIGNATURE_KEY: &str = "test-signature";
pub const START_PATH: &str = "/call-verification/start-inbound-call-waiting";

/// Everything a test needs; keep it alive for the duration of the test.
pub struct TestEnv {
    pub state: Arc<AppState<RedbSessionStore>>,
    pub app: Router,
    pub clock: ManualClock,
    pub provider: MockServer,
    pub temp_dir: TempDir,
}

/// Settings pointing at `provider_url` with test credentials
pub fn test_settings(provider_url: &str, temp_dir: &TempDir) -> Settings {
    let mut settings = Settings {
        access_key: ACCESS_KEY.to_string(),
        signature_key: SIGNATURE_KEY.to_string(),
        storage_path: temp_dir.path().join("sessions.redb"),
        ..Settings::default()
    };
    settings.provider.base_url = provider_url.to_string();
    settings.provider.connect_retries = 0;
    settings
}

/// Sets up a test environment with an empty provider mock
pub async fn setup_test_env() -> TestEnv {
    setup_test_env_with(|_| {}).await
}

/// Sets up a test environment, letting the caller adjust the settings
pub async fn setup_test_env_with(adjust: impl FnOnce(&mut Settings)) -> TestEnv {
    build_env(adjust, |_| {}).await
}

/// Sets up a test environment whose store already holds the raw bytes `raw`
/// under `call_id`, bypassing record encoding
pub async fn setup_test_env_with_raw_record(call_id: &str, raw: &[u8]) -> TestEnv {
    build_env(|_| {}, |path| write_raw_record(path, call_id, raw)).await
}

fn write_raw_record(path: &Path, call_id: &str, raw: &[u8]) {
    let table: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
    let db = Database::create(path).unwrap();
    let txn = db.begin_write().unwrap();
    {
        let mut sessions = txn.open_table(table).unwrap();
        sessions.insert(call_id, raw).unwrap();
    }
    txn.commit().unwrap();
}

async fn build_env(adjust: impl FnOnce(&mut Settings), seed: impl FnOnce(&Path)) -> TestEnv {
    let provider = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();

    let mut settings = test_settings(&provider.uri(), &temp_dir);
    adjust(&mut settings);
    seed(&settings.storage_path);

    let store = RedbSessionStore::open(&settings.storage_path).unwrap();
    let clock = ManualClock::new(START);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let state = Arc::new(AppState::with_clock(store, settings, shared).unwrap());
    let app = create_router(Arc::clone(&state));

    TestEnv {
        state,
        app,
        clock,
        provider,
        temp_dir,
    }
}

/// Provider reply accepting a verification with the given call id
pub fn accepted(call_id: &str) -> serde_json::Value {
    json!({
        "status": "success",
        "data": {
            "result": "success",
            "callDetails": {
                "callId": call_id,
                "callbackLink": "ignored",
                "clientNumber": "+15551234567",
                "confirmationNumber": "+78005553535",
                "isMnp": false,
                "operatorName": "Operator",
                "operatorNameMnp": null,
                "regionName": "Region",
                "qrCodeUri": "data:image/png;base64,AAAA",
                "userData": null
            }
        }
    })
}

/// Make the provider answer every start request with `reply`
pub async fn provider_replies(env: &TestEnv, reply: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(START_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply))
        .mount(&env.provider)
        .await;
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub fn form_request(action: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/?action={action}"))
        .header("host", "verify.example.org")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("x-real-ip", "198.51.100.2")
        .header("origin", "https://app.example.org")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn callback_request(token: Option<&str>, body: &str) -> Request<Body> {
    let uri = match token {
        Some(token) => format!("/?action=callback&token={token}"),
        None => "/?action=callback".to_string(),
    };
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
