//! Query model and the per-query result cache.
//!
//! A batch of [`DataQuery`] values comes in from the host; [`QueryRouter`]
//! classifies each one, serves it from [`QueryCache`] when possible and
//! otherwise hands it to the frame assembler.

mod cache;
mod router;

pub use cache::*;
pub use router::*;

use crate::frame::Frame;
use crate::prtg::{ApiError, StringOrNumber};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Query error types.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{0}")]
    BadRequest(String),
    #[error("failed to parse query: {0}")]
    InvalidBody(#[from] serde_json::Error),
    #[error("{context}: {source}")]
    Upstream {
        context: &'static str,
        #[source]
        source: ApiError,
    },
    #[error("too many queries: {count} exceeds the limit of {limit}")]
    TooManyQueries { count: usize, limit: usize },
}

impl QueryError {
    pub fn upstream(context: &'static str, source: ApiError) -> Self {
        QueryError::Upstream { context, source }
    }

    /// Host status the error is reported with.
    pub fn status(&self) -> Status {
        match self {
            QueryError::BadRequest(_) | QueryError::InvalidBody(_) => Status::BadRequest,
            QueryError::Upstream { .. } => Status::Internal,
            QueryError::TooManyQueries { .. } => Status::TooManyRequests,
        }
    }
}

/// HTTP-like status attached to every query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    TooManyRequests,
    Internal,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::TooManyRequests => 429,
            Status::Internal => 500,
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

/// Absolute query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeRange {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub from: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.to - self.from
    }
}

/// One inbound query. `json` holds the query body and is decoded per query so
/// that one malformed body does not fail its siblings.
#[derive(Debug, Clone, Deserialize)]
pub struct DataQuery {
    #[serde(rename = "refId")]
    pub ref_id: String,
    #[serde(rename = "queryType", default)]
    pub query_type: String,
    #[serde(rename = "timeRange")]
    pub time_range: TimeRange,
    #[serde(default)]
    pub json: serde_json::Value,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    StringOrNumber::deserialize(deserializer).map(|v| v.0)
}

/// Decoded query body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryModel {
    pub query_type: String,
    #[serde(deserialize_with = "string_or_number")]
    pub sensor_id: String,
    pub group: String,
    pub device: String,
    pub sensor: String,
    pub channel: String,
    pub channel_array: Vec<String>,
    pub property: String,
    pub filter_property: String,
    pub include_group_name: bool,
    pub include_device_name: bool,
    pub include_sensor_name: bool,
    pub manual_method: String,
    #[serde(deserialize_with = "string_or_number")]
    pub manual_object_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub panel_id: String,
    /// Poll interval for streams, in milliseconds.
    pub stream_interval: i64,
    pub update_mode: String,
    pub ref_id: String,
    /// Stream window start, epoch milliseconds.
    pub from: i64,
    /// Stream window end, epoch milliseconds.
    pub to: i64,
}

impl QueryModel {
    /// Requested channels: `channelArray`, or `channel` when the array is empty.
    pub fn channels(&self) -> Vec<String> {
        if !self.channel_array.is_empty() {
            self.channel_array.clone()
        } else if !self.channel.is_empty() {
            vec![self.channel.clone()]
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    Metrics,
    Manual,
    /// Property lookup, formatted value.
    Text,
    /// Property lookup, unformatted value.
    Raw,
    Unknown(String),
}

impl QueryKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "metrics" => QueryKind::Metrics,
            "manual" => QueryKind::Manual,
            "text" => QueryKind::Text,
            "raw" => QueryKind::Raw,
            other => QueryKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            QueryKind::Metrics => "metrics",
            QueryKind::Manual => "manual",
            QueryKind::Text => "text",
            QueryKind::Raw => "raw",
            QueryKind::Unknown(name) => name,
        }
    }
}

/// Result for one reference id.
#[derive(Debug, Clone, Serialize)]
pub struct DataResponse {
    pub frames: Vec<Frame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: Status,
}

impl DataResponse {
    pub fn ok(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            error: None,
            status: Status::Ok,
        }
    }

    pub fn error(status: Status, message: impl Into<String>) -> Self {
        Self {
            frames: Vec::new(),
            error: Some(message.into()),
            status,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl From<&QueryError> for DataResponse {
    fn from(err: &QueryError) -> Self {
        DataResponse::error(err.status(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_model_decoding() {
        let model: QueryModel = serde_json::from_value(json!({
            "queryType": "metrics",
            "sensorId": 2001,
            "channelArray": ["Ping Time"],
            "includeDeviceName": true,
            "panelId": 4,
            "streamInterval": 2000
        }))
        .unwrap();
        assert_eq!(model.sensor_id, "2001");
        assert_eq!(model.panel_id, "4");
        assert!(model.include_device_name);
        assert_eq!(model.stream_interval, 2000);
        assert_eq!(model.channels(), vec!["Ping Time".to_string()]);
    }

    #[test]
    fn test_single_channel_fallback() {
        let model: QueryModel =
            serde_json::from_value(json!({"sensorId": "7", "channel": "Traffic In"})).unwrap();
        assert_eq!(model.channels(), vec!["Traffic In".to_string()]);
        assert!(QueryModel::default().channels().is_empty());
    }

    #[test]
    fn test_data_query_decoding() {
        let query: DataQuery = serde_json::from_value(json!({
            "refId": "A",
            "timeRange": {"from": 1672531200000i64, "to": 1672617600000i64},
            "json": {"queryType": "metrics"}
        }))
        .unwrap();
        assert_eq!(query.ref_id, "A");
        assert_eq!(query.time_range.duration(), chrono::Duration::hours(24));
        assert_eq!(query.json["queryType"], "metrics");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(QueryError::BadRequest("x".into()).status().code(), 400);
        let upstream = QueryError::upstream("failed to fetch data", ApiError::AccessDenied);
        assert_eq!(upstream.status(), Status::Internal);
        assert!(upstream.to_string().starts_with("failed to fetch data: access denied"));
        let many = QueryError::TooManyQueries { count: 26, limit: 25 };
        assert_eq!(many.status().code(), 429);

        let response = DataResponse::from(&many);
        assert!(response.is_error());
        assert_eq!(serde_json::to_value(&response).unwrap()["status"], 429);
    }

    #[test]
    fn test_query_kind() {
        assert_eq!(QueryKind::parse("raw"), QueryKind::Raw);
        assert_eq!(QueryKind::parse("annotations").as_str(), "annotations");
    }
}
