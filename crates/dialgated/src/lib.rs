//! dialgated: HTTP surface of dialgate
//!
//! Routes:
//! - `POST /webhook/twilio/voice/amd`: AMD verdict callback, always 200
//! - `POST /webhook/twilio/voice/status`: status callback, always 200
//! - `POST /calls`: place a call and wait for its disposition

pub mod config;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use dialgate_core::webhook::session_from_query;
use dialgate_core::{CallOrchestrator, CallResult, EventKind, OrchestrationError, WebhookIngest};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use twilio_voice::{AMD_CALLBACK_PATH, STATUS_CALLBACK_PATH};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CallOrchestrator>,
    pub ingest: WebhookIngest,
}

/// Build the daemon router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(AMD_CALLBACK_PATH, post(amd_webhook))
        .route(STATUS_CALLBACK_PATH, post(status_webhook))
        .route("/calls", post(place_call))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Callbacks are acknowledged whatever their query string holds.
async fn amd_webhook(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> StatusCode {
    ingest(&state, EventKind::Amd, query, &body).await
}

async fn status_webhook(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> StatusCode {
    ingest(&state, EventKind::Status, query, &body).await
}

async fn ingest(
    state: &AppState,
    kind: EventKind,
    query: Option<String>,
    body: &[u8],
) -> StatusCode {
    let session = session_from_query(query.as_deref());
    info!(
        queue = kind.queue(),
        socket_id = session.as_deref().unwrap_or(""),
        "webhook received"
    );
    state.ingest.ingest(kind, body, session.as_deref()).await;
    StatusCode::OK
}

/// Body of `POST /calls`.
#[derive(Debug, Deserialize)]
pub struct PlaceCallRequest {
    pub to: String,
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    call_id: Option<String>,
}

/// `OrchestrationError` rendered as an HTTP response.
pub struct ApiError(OrchestrationError);

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            OrchestrationError::NotPlaced(_) => StatusCode::BAD_GATEWAY,
            err if err.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            OrchestrationError::Unresolved { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.0.to_string(),
            call_id: self.0.call_id().map(|id| id.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

async fn place_call(
    State(state): State<AppState>,
    Json(request): Json<PlaceCallRequest>,
) -> Result<Json<CallResult>, ApiError> {
    let result = state
        .orchestrator
        .make_call(&request.to, request.session.as_deref())
        .await
        .inspect_err(|e| warn!(to = %request.to, error = %e, "call failed"))?;
    Ok(Json(result))
}
