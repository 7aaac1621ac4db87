// ============================
// callverify backend-lib/src/router.rs
// ============================
//! HTTP surface.
//!
//! Everything is a `POST /` with an `action` query parameter:
//!
//! * `action=start`: form field `phoneNumber`, replies with the provider's call details
//! * `action=check`: form field `callId`, replies with `{timeout, flag}`
//! * `action=callback&token=..`: JSON `{callId}` posted by the provider
use std::sync::Arc;

use axum::{
    extract::{FromRequest, Query, Request, State},
    http::{header::HOST, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Form, Json, Router,
};
use callverify_common::{CallbackPayload, CheckForm, CheckResponse, StartForm};
use serde::Deserialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::error::AppError;
use crate::middleware::rate_limit;
use crate::storage::SessionStore;
use crate::AppState;

/// Largest callback body accepted from the provider
const MAX_CALLBACK_BODY: usize = 16 * 1024;

/// Query parameters of `POST /`
#[derive(Debug, Deserialize)]
pub struct ActionParams {
    pub action: Option<String>,
    pub token: Option<String>,
}

/// Create the verification router
pub fn create_router<S: SessionStore + 'static>(state: Arc<AppState<S>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(dispatch::<S>))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit::<S>,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Route a request by its `action` parameter
pub async fn dispatch<S: SessionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ActionParams>,
    request: Request,
) -> Result<Response, AppError> {
    match params.action.as_deref() {
        Some("start") => start(&state, request).await,
        Some("check") => check(&state, request).await,
        Some("callback") => callback(&state, params.token.as_deref(), request).await,
        Some(other) => Err(AppError::InvalidInput(format!("Unknown action: {other}"))),
        None => Err(AppError::InvalidInput("Missing action parameter".to_string())),
    }
}

async fn start<S: SessionStore + 'static>(
    state: &AppState<S>,
    request: Request,
) -> Result<Response, AppError> {
    let base_url = public_base_url(state, &request)?;
    let Form(form) = Form::<StartForm>::from_request(request, &())
        .await
        .map_err(|e| AppError::InvalidInput(e.body_text()))?;

    let details = state.verification.start(&form.phone_number, &base_url).await?;
    Ok(Json(details).into_response())
}

async fn check<S: SessionStore + 'static>(
    state: &AppState<S>,
    request: Request,
) -> Result<Response, AppError> {
    let Form(form) = Form::<CheckForm>::from_request(request, &())
        .await
        .map_err(|e| AppError::InvalidInput(e.body_text()))?;

    let status = state.verification.check(&form.call_id).await?;
    Ok(Json(CheckResponse::from(status)).into_response())
}

async fn callback<S: SessionStore + 'static>(
    state: &AppState<S>,
    token: Option<&str>,
    request: Request,
) -> Result<Response, AppError> {
    state.verification.authorize_callback(token)?;

    // The provider's Content-Type is not guaranteed, so parse the raw body
    let body = axum::body::to_bytes(request.into_body(), MAX_CALLBACK_BODY)
        .await
        .map_err(|e| AppError::InvalidInput(format!("Unreadable callback body: {e}")))?;
    let payload: CallbackPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidInput(format!("Malformed callback body: {e}")))?;

    state.verification.callback(&payload.call_id).await?;
    Ok(StatusCode::OK.into_response())
}

/// Base URL the provider should call back on: configured, or derived from
/// the request's Host header.
fn public_base_url<S>(state: &AppState<S>, request: &Request) -> Result<String, AppError> {
    if let Some(url) = &state.settings.public_base_url {
        return Ok(url.clone());
    }

    let host = request
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Missing Host header".to_string()))?;
    Ok(format!("http://{host}"))
}
