//! Turns PRTG payloads into result frames.

use super::{attribute, Entity, Field, FieldValues, Frame, FrameMeta, FrameType, PropertyValue};
use crate::prtg::{HistoricalDataResponse, PrtgApi, TableRow};
use crate::query::{QueryError, QueryModel, TimeRange};
use crate::timeparse::DateTimeParser;

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Time and value points of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSeries {
    pub channel: String,
    pub times: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
}

/// Display name of a channel, prefixed with group, device and sensor names as
/// the query asks for. The sensor ends up outermost.
pub fn display_name(model: &QueryModel, channel: &str) -> String {
    let mut name = channel.to_string();
    if model.include_group_name && !model.group.is_empty() {
        name = format!("{} - {}", model.group, name);
    }
    if model.include_device_name && !model.device.is_empty() {
        name = format!("{} - {}", model.device, name);
    }
    if model.include_sensor_name && !model.sensor.is_empty() {
        name = format!("{} - {}", model.sensor, name);
    }
    name
}

/// Builds frames for each query kind on top of a [`PrtgApi`].
#[derive(Clone)]
pub struct Assembler {
    api: Arc<dyn PrtgApi>,
    parser: DateTimeParser,
}

impl Assembler {
    pub fn new(api: Arc<dyn PrtgApi>, parser: DateTimeParser) -> Self {
        Self { api, parser }
    }

    /// Fetch historic data once and split it into one series per channel.
    ///
    /// Rows with an unparsable datetime, or where the channel is missing or not
    /// numeric, are skipped.
    pub async fn series(&self, model: &QueryModel, range: TimeRange) -> Result<Vec<ChannelSeries>, QueryError> {
        let channels = model.channels();
        if channels.is_empty() {
            return Err(QueryError::BadRequest("channel selection required".to_string()));
        }
        if model.sensor_id.is_empty() {
            return Err(QueryError::BadRequest("sensorId is required".to_string()));
        }

        let data = self
            .api
            .historical_data(&model.sensor_id, range.from, range.to)
            .await
            .map_err(|e| QueryError::upstream("failed to fetch historical data", e))?;

        Ok(self.split_channels(&data, &channels))
    }

    fn split_channels(&self, data: &HistoricalDataResponse, channels: &[String]) -> Vec<ChannelSeries> {
        let stamps: Vec<Option<DateTime<Utc>>> = data
            .histdata
            .iter()
            .map(|row| self.parser.parse(&row.datetime).ok().map(|(at, _)| at))
            .collect();

        channels
            .iter()
            .map(|channel| {
                let mut series = ChannelSeries {
                    channel: channel.clone(),
                    times: Vec::new(),
                    values: Vec::new(),
                };
                for (row, stamp) in data.histdata.iter().zip(&stamps) {
                    let Some(at) = stamp else { continue };
                    if let Some(value) = row.values.get(channel).and_then(|v| v.as_f64()) {
                        series.times.push(*at);
                        series.values.push(value);
                    }
                }
                series
            })
            .collect()
    }

    /// One (time, value) frame per requested channel.
    pub async fn metrics(&self, model: &QueryModel, range: TimeRange) -> Result<Vec<Frame>, QueryError> {
        let series = self.series(model, range).await?;
        tracing::debug!(
            sensor_id = %model.sensor_id,
            channels = series.len(),
            "Assembling metrics frames"
        );

        let duration = range.duration();
        let frames = series
            .into_iter()
            .map(|s| {
                let meta = FrameMeta::new(FrameType::TimeSeriesMulti)
                    .with("from", range.from.timestamp_millis())
                    .with("to", range.to.timestamp_millis())
                    .with("channel", s.channel.as_str())
                    .with("stable", true)
                    .with("duration", duration.num_seconds())
                    .with("timezone", self.parser.timezone().name());

                Frame::new(format!("metrics_{}_{}", model.sensor_id, s.channel))
                    .with_field(Field::new("Time", FieldValues::Time(s.times)))
                    .with_field(
                        Field::new("Value", FieldValues::Number(s.values))
                            .with_display_name(display_name(model, &s.channel)),
                    )
                    .with_meta(meta)
            })
            .collect();

        Ok(frames)
    }

    /// Key/value table of an arbitrary API method's flattened response.
    pub async fn manual(&self, model: &QueryModel, ref_id: &str) -> Result<Vec<Frame>, QueryError> {
        if model.manual_method.trim().is_empty() {
            return Err(QueryError::BadRequest("manual method is required".to_string()));
        }

        let response = self
            .api
            .manual_method(&model.manual_method, &model.manual_object_id)
            .await
            .map_err(|e| QueryError::upstream("manual API request failed", e))?;

        let (keys, values): (Vec<String>, Vec<String>) = response
            .key_values
            .into_iter()
            .map(|kv| (kv.key, kv.value.to_string()))
            .unzip();

        let mut meta = FrameMeta::new(FrameType::Table);
        match response.raw {
            serde_json::Value::Object(map) => meta.custom = map,
            other => meta = meta.with("value", other),
        }

        let frame = Frame::new(format!("manual_{}", ref_id))
            .with_field(Field::new("Key", FieldValues::String(keys)).with_display_name("Property"))
            .with_field(Field::new("Value", FieldValues::String(values)).with_display_name("Value"))
            .with_meta(meta);

        Ok(vec![frame])
    }

    /// Attribute of a group, device or sensor looked up by exact name.
    ///
    /// Group lookups yield one point per matching group; device and sensor
    /// lookups yield the first match only. `raw` selects the unformatted column.
    pub async fn property(&self, model: &QueryModel, raw: bool, ref_id: &str) -> Result<Vec<Frame>, QueryError> {
        let entity = Entity::parse(&model.property)
            .ok_or_else(|| QueryError::BadRequest(format!("unknown property '{}'", model.property)))?;

        let mut filter = model.filter_property.clone();
        if raw && !filter.ends_with("_raw") {
            filter.push_str("_raw");
        }
        let accessor = attribute(&filter)
            .ok_or_else(|| QueryError::BadRequest(format!("unknown filter property '{}'", filter)))?;

        let (rows, wanted, single): (Vec<TableRow>, &str, bool) = match entity {
            Entity::Group => {
                if model.group.is_empty() {
                    return Err(QueryError::BadRequest("group parameter is required".to_string()));
                }
                let groups = self
                    .api
                    .groups()
                    .await
                    .map_err(|e| QueryError::upstream("failed to fetch groups", e))?;
                (groups.groups, model.group.as_str(), false)
            }
            Entity::Device => {
                if model.group.is_empty() {
                    return Err(QueryError::BadRequest(
                        "group parameter is required for device query".to_string(),
                    ));
                }
                if model.device.is_empty() {
                    return Err(QueryError::BadRequest("device name is required".to_string()));
                }
                let devices = self
                    .api
                    .devices(&model.group)
                    .await
                    .map_err(|e| QueryError::upstream("failed to fetch devices", e))?;
                (devices.devices, model.device.as_str(), true)
            }
            Entity::Sensor => {
                if model.device.is_empty() {
                    return Err(QueryError::BadRequest(
                        "device parameter is required for sensor query".to_string(),
                    ));
                }
                if model.sensor.is_empty() {
                    return Err(QueryError::BadRequest("sensor name is required".to_string()));
                }
                let sensors = self
                    .api
                    .sensors(&model.device)
                    .await
                    .map_err(|e| QueryError::upstream("failed to fetch sensors", e))?;
                (sensors.sensors, model.sensor.as_str(), true)
            }
        };

        let mut times = Vec::new();
        let mut values = Vec::new();
        for row in rows.iter().filter(|row| entity.name_of(row) == wanted) {
            let Ok((at, _)) = self.parser.parse(&row.datetime) else {
                continue;
            };
            times.push(at);
            values.push(accessor(row));
            if single {
                break;
            }
        }

        let name = format!("property_{}_{}_{}", ref_id, entity.as_str(), filter);
        if times.is_empty() {
            return Ok(vec![Frame::new(format!("{}_empty", name))]);
        }

        let column = if values.iter().all(|v| matches!(v, PropertyValue::Number(_))) {
            FieldValues::Number(
                values
                    .iter()
                    .filter_map(|v| match v {
                        PropertyValue::Number(n) => Some(*n),
                        PropertyValue::Text(_) => None,
                    })
                    .collect(),
            )
        } else {
            FieldValues::String(
                values
                    .into_iter()
                    .map(|v| match v {
                        PropertyValue::Number(n) => n.to_string(),
                        PropertyValue::Text(s) => s,
                    })
                    .collect(),
            )
        };

        let frame = Frame::new(name)
            .with_field(Field::new("Time", FieldValues::Time(times)))
            .with_field(
                Field::new("Value", column)
                    .with_display_name(format!("{} - ({})", entity.as_str(), filter)),
            );

        Ok(vec![frame])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{historic, table_row, MockApi};
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use serde_json::json;

    fn assembler(api: MockApi) -> (Assembler, Arc<MockApi>) {
        let api = Arc::new(api);
        (Assembler::new(api.clone(), DateTimeParser::new(Tz::UTC)), api)
    }

    fn day() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap(),
        )
    }

    fn model(value: serde_json::Value) -> QueryModel {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_display_name_prefixes() {
        let m = model(json!({
            "group": "Servers", "device": "web01", "sensor": "Ping",
            "includeGroupName": true, "includeDeviceName": true, "includeSensorName": true
        }));
        assert_eq!(display_name(&m, "Ping Time"), "Ping - web01 - Servers - Ping Time");

        let m = model(json!({"group": "Servers", "includeDeviceName": true}));
        assert_eq!(display_name(&m, "Ping Time"), "Ping Time");
    }

    #[tokio::test]
    async fn test_metrics_frames_per_channel() {
        let (assembler, api) = assembler(MockApi::new().with_historic(historic(&[
            json!({"datetime": "01.01.2023 00:05:00", "Ping Time": 12, "Loss": "0.5"}),
            json!({"datetime": "garbage", "Ping Time": 13, "Loss": 1}),
            json!({"datetime": "01.01.2023 00:10:00", "Ping Time": "n/a", "Loss": 2}),
            json!({"datetime": "01.01.2023 00:15:00", "Ping Time": 14.5}),
        ])));

        let m = model(json!({"sensorId": "123", "channelArray": ["Ping Time", "Loss"]}));
        let frames = assembler.metrics(&m, day()).await.unwrap();
        assert_eq!(api.calls(), 1);
        assert_eq!(frames.len(), 2);

        let ping = &frames[0];
        assert_eq!(ping.name, "metrics_123_Ping Time");
        assert_eq!(ping.len(), 2);
        assert_eq!(
            ping.field("Value").unwrap().values,
            FieldValues::Number(vec![12.0, 14.5])
        );
        assert_eq!(ping.custom("channel"), Some(&json!("Ping Time")));
        assert_eq!(ping.custom("from"), Some(&json!(1672531200000i64)));
        assert_eq!(ping.custom("timezone"), Some(&json!("UTC")));

        let loss = &frames[1];
        assert_eq!(loss.field("Value").unwrap().values, FieldValues::Number(vec![0.5, 2.0]));
    }

    #[tokio::test]
    async fn test_metrics_empty_history_still_names_frames() {
        let (assembler, _) = assembler(MockApi::new());
        let m = model(json!({"sensorId": "123", "channel": "Ping Time"}));
        let frames = assembler.metrics(&m, day()).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "metrics_123_Ping Time");
        assert!(frames[0].is_empty());
    }

    #[tokio::test]
    async fn test_metrics_validation() {
        let (assembler, api) = assembler(MockApi::new());
        let err = assembler.metrics(&model(json!({"sensorId": "1"})), day()).await.unwrap_err();
        assert!(matches!(err, QueryError::BadRequest(_)));
        let err = assembler
            .metrics(&model(json!({"channel": "Ping"})), day())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::BadRequest(_)));
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn test_metrics_upstream_failure() {
        let (assembler, _) = assembler(MockApi::new().failing());
        let m = model(json!({"sensorId": "123", "channel": "Ping"}));
        let err = assembler.metrics(&m, day()).await.unwrap_err();
        assert!(matches!(err, QueryError::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_manual_frame() {
        let (assembler, _) = assembler(
            MockApi::new().with_manual(json!({"sensordata": {"name": "Ping", "interval": 60}})),
        );
        let m = model(json!({"manualMethod": "getsensordetails.json", "manualObjectId": 2001}));
        let frames = assembler.manual(&m, "B").await.unwrap();
        let frame = &frames[0];
        assert_eq!(frame.name, "manual_B");
        assert_eq!(frame.len(), 2);
        assert_eq!(
            frame.field("Key").unwrap().display_name.as_deref(),
            Some("Property")
        );
        assert_eq!(
            frame.field("Value").unwrap().values,
            FieldValues::String(vec!["60".into(), "Ping".into()])
        );
        assert_eq!(frame.custom("sensordata"), Some(&json!({"name": "Ping", "interval": 60})));

        let err = assembler.manual(&QueryModel::default(), "B").await.unwrap_err();
        assert!(matches!(err, QueryError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_group_property_is_multi_point() {
        let mut second = table_row("Servers", "", "", "02.01.2023 10:00:00");
        second.status = "Warning".into();
        let (assembler, _) = assembler(MockApi::new().with_groups(vec![
            table_row("Servers", "", "", "01.01.2023 10:00:00"),
            table_row("Routers", "", "", "01.01.2023 10:00:00"),
            second,
        ]));

        let m = model(json!({"property": "group", "group": "Servers", "filterProperty": "status"}));
        let frames = assembler.property(&m, false, "A").await.unwrap();
        let frame = &frames[0];
        assert_eq!(frame.name, "property_A_group_status");
        assert_eq!(
            frame.field("Value").unwrap().values,
            FieldValues::String(vec!["Up".into(), "Warning".into()])
        );
        assert_eq!(
            frame.field("Value").unwrap().display_name.as_deref(),
            Some("group - (status)")
        );
    }

    #[tokio::test]
    async fn test_sensor_property_raw_mode() {
        let (assembler, _) = assembler(MockApi::new().with_sensors(vec![
            table_row("Servers", "web01", "Ping", "01.01.2023 10:00:00"),
            table_row("Servers", "web01", "Ping", "01.01.2023 11:00:00"),
        ]));

        let m = model(json!({
            "property": "sensor", "device": "web01", "sensor": "Ping", "filterProperty": "status"
        }));
        let frames = assembler.property(&m, true, "A").await.unwrap();
        let frame = &frames[0];
        assert_eq!(frame.name, "property_A_sensor_status_raw");
        assert_eq!(frame.field("Value").unwrap().values, FieldValues::Number(vec![3.0]));
    }

    #[tokio::test]
    async fn test_device_message_is_cleaned() {
        let mut row = table_row("Servers", "web01", "", "01.01.2023 10:00:00");
        row.message = r#"<div class="status">OK</div>"#.into();
        let (assembler, _) = assembler(MockApi::new().with_devices(vec![row]));

        let m = model(json!({
            "property": "device", "group": "Servers", "device": "web01", "filterProperty": "message"
        }));
        let frames = assembler.property(&m, false, "A").await.unwrap();
        assert_eq!(
            frames[0].field("Value").unwrap().values,
            FieldValues::String(vec!["OK".into()])
        );
    }

    #[tokio::test]
    async fn test_property_no_match_yields_empty_frame() {
        let (assembler, _) = assembler(MockApi::new());
        let m = model(json!({"property": "group", "group": "Missing", "filterProperty": "tags"}));
        let frames = assembler.property(&m, false, "C").await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "property_C_group_tags_empty");
        assert!(frames[0].fields.is_empty());
    }

    #[tokio::test]
    async fn test_property_validation() {
        let (assembler, api) = assembler(MockApi::new());

        let m = model(json!({"property": "sensor", "sensor": "Ping", "filterProperty": "status"}));
        assert!(matches!(
            assembler.property(&m, false, "A").await,
            Err(QueryError::BadRequest(_))
        ));

        let m = model(json!({"property": "probe", "filterProperty": "status"}));
        assert!(matches!(
            assembler.property(&m, false, "A").await,
            Err(QueryError::BadRequest(_))
        ));

        let m = model(json!({"property": "group", "group": "G", "filterProperty": "name"}));
        assert!(matches!(
            assembler.property(&m, false, "A").await,
            Err(QueryError::BadRequest(_))
        ));

        // A parent alone does not select anything.
        let m = model(json!({"property": "device", "group": "G", "filterProperty": "status"}));
        assert!(matches!(
            assembler.property(&m, false, "A").await,
            Err(QueryError::BadRequest(_))
        ));
        let m = model(json!({"property": "sensor", "device": "D", "filterProperty": "status"}));
        assert!(matches!(
            assembler.property(&m, false, "A").await,
            Err(QueryError::BadRequest(_))
        ));
        assert_eq!(api.calls(), 0);
    }
}
