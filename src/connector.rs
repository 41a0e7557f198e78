//! One configured PRTG connector instance.
//!
//! Owns the upstream client, the query router and the stream manager, and
//! exposes the inbound operations: batch queries, resource calls, health
//! checks and streams.

use crate::config::Settings;
use crate::frame::Assembler;
use crate::observer::{Observer, TracingObserver};
use crate::prtg::{ApiError, Client, PrtgApi};
use crate::query::{DataQuery, DataResponse, QueryRouter};
use crate::stream::StreamManager;
use crate::timeparse::DateTimeParser;

use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    pub status: HealthStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl HealthResult {
    fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            message: message.into(),
            details: None,
        }
    }
}

/// Response to a resource call: an HTTP status and a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResponse {
    pub status: u16,
    pub body: Value,
}

impl ResourceResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }
}

pub struct Connector {
    api: Arc<dyn PrtgApi>,
    router: Arc<QueryRouter>,
    streams: StreamManager,
}

impl Connector {
    /// Create a connector talking to the PRTG server in `settings`.
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        let observer: Arc<dyn Observer> = Arc::new(TracingObserver);
        let client = Client::new(settings, observer.clone())?;
        Ok(Self::with_api(Arc::new(client), settings.timezone, observer))
    }

    /// Create a connector on top of any [`PrtgApi`] implementation.
    pub fn with_api(api: Arc<dyn PrtgApi>, timezone: Tz, observer: Arc<dyn Observer>) -> Self {
        let assembler = Assembler::new(api.clone(), DateTimeParser::new(timezone));
        let router = QueryRouter::new(assembler.clone(), api.cache_time(), observer.clone());
        Self {
            api,
            router: Arc::new(router),
            streams: StreamManager::new(assembler, observer),
        }
    }

    pub async fn query_data(&self, queries: Vec<DataQuery>) -> HashMap<String, DataResponse> {
        self.router.query_data(queries).await
    }

    /// Serve a lookup path: `groups`, `devices/{group}`, `sensors/{device}` or
    /// `channels/{sensorId}`.
    pub async fn call_resource(&self, path: &str) -> ResourceResponse {
        let start = Instant::now();
        let path = path.trim_matches('/');
        let (kind, arg) = match path.split_once('/') {
            Some((kind, arg)) => (kind, arg),
            None => (path, ""),
        };

        let response = match kind {
            "groups" => to_response(self.api.groups().await),
            "devices" if arg.is_empty() => ResourceResponse::error(400, "missing group parameter"),
            "devices" => to_response(self.api.devices(arg).await),
            "sensors" if arg.is_empty() => ResourceResponse::error(400, "missing device parameter"),
            "sensors" => to_response(self.api.sensors(arg).await),
            "channels" if arg.is_empty() => ResourceResponse::error(400, "missing sensor parameter"),
            "channels" => to_response(self.api.channels(arg).await),
            _ => ResourceResponse::error(404, format!("unknown resource path: {}", path)),
        };

        tracing::info!(
            path,
            status = response.status,
            duration_ms = start.elapsed().as_millis() as u64,
            "Resource call completed"
        );
        response
    }

    /// Check connectivity. All caches are dropped first so the result reflects
    /// the live server.
    pub async fn check_health(&self) -> HealthResult {
        self.router.clear_cache().await;
        self.api.clear_cache().await;

        let status = match self.api.status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("Failed to connect to PRTG server: {}", e);
                return HealthResult::error(format!("PRTG connection failed: {}", e));
            }
        };

        let version = if status.version.is_empty() {
            status.prtg_version.clone()
        } else {
            status.version.clone()
        };
        if version.is_empty() {
            tracing::error!("Invalid response from PRTG server");
            return HealthResult::error("Invalid response from PRTG server");
        }

        tracing::info!(prtg_version = %version, "Health check successful");
        HealthResult {
            status: HealthStatus::Ok,
            message: format!("Data source is working. PRTG Version: {}", version),
            details: Some(json!({
                "version": version,
                "totalSensors": status.total_sens,
            })),
        }
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    /// Stop all streams.
    pub fn dispose(&self) {
        self.streams.shutdown();
    }
}

fn to_response<T: Serialize>(result: Result<T, ApiError>) -> ResourceResponse {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(body) => ResourceResponse::ok(body),
            Err(e) => ResourceResponse::error(500, format!("error marshaling response: {}", e)),
        },
        Err(e) => {
            tracing::error!("Resource request failed: {}", e);
            ResourceResponse::error(500, e.to_string())
        }
    }
}
