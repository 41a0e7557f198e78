//! HTTP request handlers.

use super::AppState;
use crate::connector::HealthStatus;
use crate::query::{DataQuery, DataResponse};
use crate::stream::{RunOutcome, StreamError, StreamStatus};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use tokio::sync::mpsc;

/// Frames buffered per stream connection before the poller waits.
const STREAM_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub queries: Vec<DataQuery>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub results: HashMap<String, DataResponse>,
}

pub async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> impl IntoResponse {
    let results = state.connector.query_data(req.queries).await;
    Json(QueryResponse { results })
}

// ============================================================================
// Resources & Health
// ============================================================================

pub async fn handle_resource(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    let response = state.connector.call_resource(&path).await;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body))
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.connector.check_health().await;
    let status = match health.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Error => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health))
}

// ============================================================================
// Streams
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub path: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct StreamStatusResponse {
    pub status: StreamStatus,
}

pub async fn handle_stream_subscribe(
    State(state): State<AppState>,
    Json(req): Json<StreamRequest>,
) -> impl IntoResponse {
    let status = state.connector.streams().subscribe(&req.path, &req.data).await;
    Json(StreamStatusResponse { status })
}

pub async fn handle_stream_publish(
    State(state): State<AppState>,
    Json(req): Json<StreamRequest>,
) -> impl IntoResponse {
    let status = state.connector.streams().publish(&req.path);
    Json(StreamStatusResponse { status })
}

/// Run a stream and relay its frames as server-sent `frame` events. The poller
/// stops once the client disconnects.
pub async fn handle_stream_run(
    State(state): State<AppState>,
    Json(req): Json<StreamRequest>,
) -> Response {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    match state.connector.streams().run(&req.path, &req.data, tx).await {
        Ok(RunOutcome::Started) => {}
        Ok(RunOutcome::Nudged) => {
            return Json(json!({ "status": "refreshed" })).into_response();
        }
        Err(e) => {
            let status = match e {
                StreamError::NotFound(_) => StatusCode::NOT_FOUND,
                StreamError::PanelQuota(_) => StatusCode::FORBIDDEN,
                StreamError::InvalidData(_) | StreamError::MissingField(_) => StatusCode::BAD_REQUEST,
                StreamError::Query(_) | StreamError::PollTimeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return (status, Json(json!({ "error": e.to_string() }))).into_response();
        }
    }

    let events = futures::stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        let event = Event::default()
            .event("frame")
            .json_data(&frame)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
        Some((Ok::<_, Infallible>(event), rx))
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}
