//! In-memory [`PrtgApi`] double shared by unit tests.

use crate::prtg::{
    flatten_json, ApiError, DeviceListResponse, GroupListResponse, HistoricalDataResponse,
    ManualResponse, PrtgApi, SensorListResponse, StatusResponse, TableRow,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Canned responses plus a counter of upstream calls.
pub struct MockApi {
    historic: HistoricalDataResponse,
    groups: Vec<TableRow>,
    devices: Vec<TableRow>,
    sensors: Vec<TableRow>,
    manual: Value,
    status: StatusResponse,
    cache_time: Duration,
    fail: AtomicBool,
    hang: AtomicBool,
    calls: AtomicUsize,
    clears: AtomicUsize,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            historic: HistoricalDataResponse::default(),
            groups: Vec::new(),
            devices: Vec::new(),
            sensors: Vec::new(),
            manual: json!({}),
            status: StatusResponse::default(),
            cache_time: Duration::from_secs(30),
            fail: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
        }
    }

    pub fn with_historic(mut self, historic: HistoricalDataResponse) -> Self {
        self.historic = historic;
        self
    }

    pub fn with_groups(mut self, rows: Vec<TableRow>) -> Self {
        self.groups = rows;
        self
    }

    pub fn with_devices(mut self, rows: Vec<TableRow>) -> Self {
        self.devices = rows;
        self
    }

    pub fn with_sensors(mut self, rows: Vec<TableRow>) -> Self {
        self.sensors = rows;
        self
    }

    pub fn with_manual(mut self, doc: Value) -> Self {
        self.manual = doc;
        self
    }

    pub fn with_status(mut self, status: StatusResponse) -> Self {
        self.status = status;
        self
    }

    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make historic data requests never complete.
    pub fn set_hanging(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Upstream calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn call<T: Clone>(&self, value: &T) -> Result<T, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApiError::UnexpectedStatus(500));
        }
        Ok(value.clone())
    }
}

#[async_trait]
impl PrtgApi for MockApi {
    fn cache_time(&self) -> Duration {
        self.cache_time
    }

    async fn clear_cache(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    async fn status(&self) -> Result<StatusResponse, ApiError> {
        self.call(&self.status)
    }

    async fn groups(&self) -> Result<GroupListResponse, ApiError> {
        let groups = self.call(&self.groups)?;
        Ok(GroupListResponse {
            treesize: groups.len() as i64,
            groups,
            ..Default::default()
        })
    }

    async fn devices(&self, group: &str) -> Result<DeviceListResponse, ApiError> {
        let devices: Vec<TableRow> = self
            .call(&self.devices)?
            .into_iter()
            .filter(|row| row.group == group)
            .collect();
        Ok(DeviceListResponse {
            treesize: devices.len() as i64,
            devices,
            ..Default::default()
        })
    }

    async fn sensors(&self, device: &str) -> Result<SensorListResponse, ApiError> {
        let sensors: Vec<TableRow> = self
            .call(&self.sensors)?
            .into_iter()
            .filter(|row| row.device == device)
            .collect();
        Ok(SensorListResponse {
            treesize: sensors.len() as i64,
            sensors,
            ..Default::default()
        })
    }

    async fn channels(&self, _sensor_id: &str) -> Result<Value, ApiError> {
        let historic = self.call(&self.historic)?;
        Ok(serde_json::to_value(historic)?)
    }

    async fn historical_data(
        &self,
        _sensor_id: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<HistoricalDataResponse, ApiError> {
        let result = self.call(&self.historic);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        result
    }

    async fn manual_method(&self, _method: &str, _object_id: &str) -> Result<ManualResponse, ApiError> {
        let raw = self.call(&self.manual)?;
        let key_values = flatten_json(&raw);
        Ok(ManualResponse { raw, key_values })
    }
}

/// Historic data response from raw rows.
pub fn historic(rows: &[Value]) -> HistoricalDataResponse {
    serde_json::from_value(json!({
        "prtg-version": "23.1.84.1375",
        "treesize": rows.len(),
        "histdata": rows,
    }))
    .unwrap()
}

/// Table row with status "Up" (raw 3) and the given names.
pub fn table_row(group: &str, device: &str, sensor: &str, datetime: &str) -> TableRow {
    TableRow {
        group: group.to_string(),
        device: device.to_string(),
        sensor: sensor.to_string(),
        datetime: datetime.to_string(),
        active: true,
        active_raw: 1,
        status: "Up".to_string(),
        status_raw: 3,
        priority: "***".to_string(),
        priority_raw: 3,
        tags: "prod".to_string(),
        tags_raw: "prod".to_string(),
        ..Default::default()
    }
}
