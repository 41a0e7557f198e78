//! PRTG wire types.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A field PRTG emits as a string for some objects and as a number for others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StringOrNumber(pub String);

impl StringOrNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for StringOrNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Ok(Self(s)),
            serde_json::Value::Number(n) => Ok(Self(n.to_string())),
            serde_json::Value::Null => Ok(Self::default()),
            other => Err(serde::de::Error::custom(format!(
                "value must be string or number, got {}",
                other
            ))),
        }
    }
}

/// A single JSON scalar.
///
/// Nested objects and arrays are kept as their JSON text so that any upstream
/// value can be carried without losing information.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
}

impl ScalarValue {
    /// Numeric view: numbers directly, strings when they parse as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Number(n) => Some(*n),
            ScalarValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for ScalarValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ScalarValue::Null,
            serde_json::Value::Bool(b) => ScalarValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => ScalarValue::Number(f),
                None => ScalarValue::String(n.to_string()),
            },
            serde_json::Value::String(s) => ScalarValue::String(s),
            other => ScalarValue::String(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ScalarValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(ScalarValue::from)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Number(n) => write!(f, "{}", n),
            ScalarValue::String(s) => f.write_str(s),
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Null => f.write_str("null"),
        }
    }
}

/// Response of `status.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusResponse {
    #[serde(rename = "prtgversion")]
    pub prtg_version: String,
    pub version: String,
    pub clock: String,
    pub alarms: StringOrNumber,
    #[serde(rename = "newalarms")]
    pub new_alarms: StringOrNumber,
    #[serde(rename = "upsens")]
    pub up_sens: StringOrNumber,
    #[serde(rename = "warnsens")]
    pub warn_sens: StringOrNumber,
    #[serde(rename = "pausedsens")]
    pub paused_sens: StringOrNumber,
    #[serde(rename = "unknownsens")]
    pub unknown_sens: StringOrNumber,
    #[serde(rename = "totalsens")]
    pub total_sens: i64,
    #[serde(rename = "clusternodename")]
    pub cluster_node_name: String,
    #[serde(rename = "readonlyuser")]
    pub read_only_user: StringOrNumber,
}

/// One row of a `table.json` listing. Groups, devices and sensors share the
/// same column set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableRow {
    pub active: bool,
    pub active_raw: i64,
    pub channel: String,
    pub channel_raw: StringOrNumber,
    pub datetime: String,
    pub datetime_raw: f64,
    pub device: String,
    pub device_raw: String,
    pub group: String,
    pub group_raw: String,
    pub message: String,
    pub message_raw: String,
    pub objid: i64,
    pub objid_raw: i64,
    pub priority: String,
    pub priority_raw: i64,
    pub sensor: String,
    pub sensor_raw: String,
    pub status: String,
    pub status_raw: i64,
    pub tags: String,
    pub tags_raw: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupListResponse {
    #[serde(rename = "prtg-version")]
    pub prtg_version: String,
    pub treesize: i64,
    pub groups: Vec<TableRow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceListResponse {
    #[serde(rename = "prtg-version")]
    pub prtg_version: String,
    pub treesize: i64,
    pub devices: Vec<TableRow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorListResponse {
    #[serde(rename = "prtg-version")]
    pub prtg_version: String,
    pub treesize: i64,
    pub sensors: Vec<TableRow>,
}

/// Response of `historicdata.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalDataResponse {
    #[serde(rename = "prtg-version")]
    pub prtg_version: String,
    pub treesize: i64,
    pub histdata: Vec<HistoricRow>,
}

/// One historic row: its datetime plus one value per channel caption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoricRow {
    #[serde(default)]
    pub datetime: String,
    #[serde(flatten)]
    pub values: HashMap<String, ScalarValue>,
}

/// Result of an arbitrary API method: the raw document and its flattened pairs.
#[derive(Debug, Clone, Serialize)]
pub struct ManualResponse {
    pub raw: serde_json::Value,
    pub key_values: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: ScalarValue,
}
