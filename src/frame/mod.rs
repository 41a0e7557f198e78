//! Result frames: named, typed tables returned to the visualization host.

mod assembler;
mod property;

pub use assembler::*;
pub use property::*;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Rendering hint for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameType {
    #[serde(rename = "timeseries-multi")]
    TimeSeriesMulti,
    #[serde(rename = "timeseries-wide")]
    TimeSeriesWide,
    #[serde(rename = "table")]
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameMeta {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub custom: Map<String, Value>,
}

impl FrameMeta {
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            custom: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.custom.insert(key.to_string(), value.into());
        self
    }
}

/// Column storage. Every entry of a column shares one type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValues {
    Time(Vec<DateTime<Utc>>),
    Number(Vec<f64>),
    String(Vec<String>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Time(v) => v.len(),
            FieldValues::Number(v) => v.len(),
            FieldValues::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn type_name(&self) -> &'static str {
        match self {
            FieldValues::Time(_) => "time",
            FieldValues::Number(_) => "number",
            FieldValues::String(_) => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub values: FieldValues,
    pub display_name: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, values: FieldValues) -> Self {
        Self {
            name: name.into(),
            values,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

// Times go out as epoch milliseconds.
impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Field", 4)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("type", self.values.type_name())?;
        match &self.values {
            FieldValues::Time(times) => {
                let millis: Vec<i64> = times.iter().map(|t| t.timestamp_millis()).collect();
                state.serialize_field("values", &millis)?;
            }
            FieldValues::Number(values) => state.serialize_field("values", values)?,
            FieldValues::String(values) => state.serialize_field("values", values)?,
        }
        let config = self
            .display_name
            .as_ref()
            .map(|name| serde_json::json!({ "displayName": name }));
        state.serialize_field("config", &config)?;
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub name: String,
    pub fields: Vec<Field>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<FrameMeta>,
}

impl Frame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            meta: None,
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_meta(mut self, meta: FrameMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.fields.first().map(|f| f.values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn custom(&self, key: &str) -> Option<&Value> {
        self.meta.as_ref().and_then(|m| m.custom.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_frame_serialization() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let frame = Frame::new("metrics_1_Ping")
            .with_field(Field::new("Time", FieldValues::Time(vec![t])))
            .with_field(Field::new("Value", FieldValues::Number(vec![1.5])).with_display_name("Ping"))
            .with_meta(FrameMeta::new(FrameType::TimeSeriesMulti).with("channel", "Ping"));

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["name"], "metrics_1_Ping");
        assert_eq!(json["fields"][0]["type"], "time");
        assert_eq!(json["fields"][0]["values"][0], 1704067200000i64);
        assert_eq!(json["fields"][0]["config"], Value::Null);
        assert_eq!(json["fields"][1]["config"]["displayName"], "Ping");
        assert_eq!(json["meta"]["type"], "timeseries-multi");
        assert_eq!(json["meta"]["custom"]["channel"], "Ping");
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::new("property_A_group_status_empty");
        assert!(frame.is_empty());
        assert!(frame.field("Value").is_none());
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("meta").is_none());
    }
}
