//! PRTG API access.
//!
//! [`Client`] talks HTTP to the PRTG server; everything above it only sees the
//! [`PrtgApi`] trait so that query and stream logic can run against an
//! in-memory double in tests.

mod client;
mod flatten;
mod models;

pub use client::*;
pub use flatten::*;
pub use models::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// PRTG API error types.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Network(String),
    #[error("access denied: please verify API token and permissions")]
    AccessDenied,
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),
    #[error("failed to parse response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// One logical PRTG API call target: a method such as `table.json` plus its
/// query parameters. Parameters are kept sorted so the built URL is stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    method: String,
    params: BTreeMap<String, String>,
}

impl Endpoint {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }
}

/// Operations the connector needs from a PRTG server.
#[async_trait]
pub trait PrtgApi: Send + Sync {
    /// Lifetime of cached upstream responses.
    fn cache_time(&self) -> Duration;

    /// Drop every cached upstream response.
    async fn clear_cache(&self);

    async fn status(&self) -> Result<StatusResponse, ApiError>;

    async fn groups(&self) -> Result<GroupListResponse, ApiError>;

    async fn devices(&self, group: &str) -> Result<DeviceListResponse, ApiError>;

    async fn sensors(&self, device: &str) -> Result<SensorListResponse, ApiError>;

    async fn channels(&self, sensor_id: &str) -> Result<serde_json::Value, ApiError>;

    async fn historical_data(
        &self,
        sensor_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HistoricalDataResponse, ApiError>;

    async fn manual_method(&self, method: &str, object_id: &str) -> Result<ManualResponse, ApiError>;
}
