//! HTTP client for the PRTG API with a URL-keyed response cache.

use super::{
    flatten_json, ApiError, DeviceListResponse, Endpoint, GroupListResponse, HistoricalDataResponse,
    ManualResponse, PrtgApi, SensorListResponse, StatusResponse,
};
use crate::config::Settings;
use crate::observer::{Observer, Outcome};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use url::Url;

/// Query parameter carrying the API token.
const TOKEN_PARAM: &str = "apitoken";

/// Row cap of the PRTG API; larger results are silently truncated upstream.
pub const MAX_ROWS: &str = "50000";

/// Default upstream request timeout. Shorter timeouts are refused.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const TABLE_COLUMNS: &str = "active,channel,datetime,device,group,message,objid,priority,sensor,status,tags";

/// Date format of the `sdate`/`edate` historic data parameters.
const HISTORIC_DATE_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

struct CacheEntry {
    body: Vec<u8>,
    expiry: Instant,
}

/// PRTG API client.
///
/// Responses are cached by their full request URL for `cache_time`; a zero
/// cache time disables caching.
pub struct Client {
    base_url: String,
    api_token: String,
    cache_time: Duration,
    timeout_ms: AtomicU64,
    tz: Tz,
    http: reqwest::Client,
    cache: RwLock<HashMap<String, CacheEntry>>,
    observer: Arc<dyn Observer>,
}

impl Client {
    /// Create a client for the configured PRTG server.
    pub fn new(settings: &Settings, observer: Arc<dyn Observer>) -> Result<Self, ApiError> {
        // PRTG installations commonly serve self-signed certificates, so this
        // client accepts them. The relaxation applies to the PRTG integration only.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
            cache_time: settings.cache_time,
            timeout_ms: AtomicU64::new(DEFAULT_TIMEOUT.as_millis() as u64),
            tz: settings.timezone,
            http,
            cache: RwLock::new(HashMap::new()),
            observer,
        })
    }

    /// Current request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Replace the request timeout.
    ///
    /// Values below [`DEFAULT_TIMEOUT`] (including zero) are ignored and the
    /// previous timeout stays in effect.
    pub fn set_timeout(&self, timeout: Duration) {
        if timeout < DEFAULT_TIMEOUT {
            tracing::debug!(requested_ms = timeout.as_millis() as u64, "Ignoring timeout below minimum");
            return;
        }
        self.timeout_ms.store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Build the full request URL for an endpoint, injecting the API token.
    ///
    /// The output is deterministic: parameters are emitted in key order and
    /// the token appears exactly once, overriding any `apitoken` parameter.
    pub fn build_url(&self, endpoint: &Endpoint) -> Result<Url, ApiError> {
        let mut url = Url::parse(&format!("{}/api/{}", self.base_url, endpoint.method()))
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;

        let mut query: BTreeMap<&str, &str> = endpoint
            .params()
            .iter()
            .filter(|(k, _)| k.as_str() != TOKEN_PARAM)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        query.insert(TOKEN_PARAM, &self.api_token);

        url.query_pairs_mut().clear().extend_pairs(query);
        Ok(url)
    }

    /// Fetch an endpoint, serving from the cache while the entry is fresh.
    pub async fn fetch(&self, endpoint: &Endpoint) -> Result<Vec<u8>, ApiError> {
        let url = self.build_url(endpoint)?.to_string();

        if !self.cache_time.is_zero() {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&url) {
                if Instant::now() < entry.expiry {
                    self.observer.cache_lookup("upstream", endpoint.method(), true);
                    return Ok(entry.body.clone());
                }
            }
            drop(cache);
            self.observer.cache_lookup("upstream", endpoint.method(), false);
        }

        let start = Instant::now();
        let result = self.get(&url).await;
        let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Error };
        self.observer.api_request(endpoint.method(), outcome, start.elapsed());

        let body = result?;

        if !self.cache_time.is_zero() {
            let now = Instant::now();
            let mut cache = self.cache.write().await;
            // Expired entries are only ever replaced, never read, so drop them here.
            cache.retain(|_, entry| now < entry.expiry);
            cache.insert(
                url,
                CacheEntry {
                    body: body.clone(),
                    expiry: now + self.cache_time,
                },
            );
        }

        Ok(body)
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let timeout = self.timeout();

        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout(timeout)
                } else {
                    ApiError::Network(e.without_url().to_string())
                }
            })?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::FORBIDDEN => {
                tracing::error!("Access denied: please verify API token and permissions");
                return Err(ApiError::AccessDenied);
            }
            other => return Err(ApiError::UnexpectedStatus(other.as_u16())),
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(timeout)
            } else {
                ApiError::Network(e.without_url().to_string())
            }
        })?;

        Ok(body.to_vec())
    }

    async fn fetch_json<T: DeserializeOwned>(&self, endpoint: &Endpoint) -> Result<T, ApiError> {
        let body = self.fetch(endpoint).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn table(content: &str) -> Endpoint {
        Endpoint::new("table.json")
            .param("content", content)
            .param("columns", TABLE_COLUMNS)
            .param("count", MAX_ROWS)
    }
}

/// Averaging bucket (seconds, as PRTG expects it) for a historic data window.
///
/// Up to a day is served raw, longer windows get coarser buckets so that the
/// result stays below the upstream row cap.
pub fn averaging_interval(from: DateTime<Utc>, to: DateTime<Utc>) -> &'static str {
    let hours = (to - from).num_seconds() as f64 / 3600.0;
    if hours <= 24.0 {
        "0"
    } else if hours <= 24.0 * 7.0 {
        "300"
    } else if hours <= 24.0 * 31.0 {
        "3600"
    } else {
        "86400"
    }
}

#[async_trait]
impl PrtgApi for Client {
    fn cache_time(&self) -> Duration {
        self.cache_time
    }

    async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    async fn status(&self) -> Result<StatusResponse, ApiError> {
        self.fetch_json(&Endpoint::new("status.json")).await
    }

    async fn groups(&self) -> Result<GroupListResponse, ApiError> {
        self.fetch_json(&Self::table("groups")).await
    }

    async fn devices(&self, group: &str) -> Result<DeviceListResponse, ApiError> {
        if group.is_empty() {
            return Err(ApiError::InvalidRequest("group parameter is required".to_string()));
        }
        self.fetch_json(&Self::table("devices").param("filter_group", group))
            .await
    }

    async fn sensors(&self, device: &str) -> Result<SensorListResponse, ApiError> {
        if device.is_empty() {
            return Err(ApiError::InvalidRequest("device parameter is required".to_string()));
        }
        self.fetch_json(&Self::table("sensors").param("filter_device", device))
            .await
    }

    async fn channels(&self, sensor_id: &str) -> Result<serde_json::Value, ApiError> {
        if sensor_id.is_empty() {
            return Err(ApiError::InvalidRequest("sensor parameter is required".to_string()));
        }
        let endpoint = Endpoint::new("historicdata.json")
            .param("content", "values")
            .param("id", sensor_id)
            .param("columns", "value_,datetime")
            .param("usecaption", "true")
            .param("count", MAX_ROWS);
        self.fetch_json(&endpoint).await
    }

    async fn historical_data(
        &self,
        sensor_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HistoricalDataResponse, ApiError> {
        if sensor_id.is_empty() {
            return Err(ApiError::InvalidRequest("missing sensor ID".to_string()));
        }
        if to <= from {
            return Err(ApiError::InvalidRequest(format!(
                "invalid time range: start {} must be before end {}",
                from, to
            )));
        }

        let avg = averaging_interval(from, to);
        let sdate = from.with_timezone(&self.tz).format(HISTORIC_DATE_FORMAT).to_string();
        let edate = to.with_timezone(&self.tz).format(HISTORIC_DATE_FORMAT).to_string();

        tracing::debug!(sensor_id, avg, %sdate, %edate, "Requesting historic data");

        let endpoint = Endpoint::new("historicdata.json")
            .param("id", sensor_id)
            .param("columns", "datetime,value_")
            .param("sdate", sdate)
            .param("edate", edate)
            .param("count", MAX_ROWS)
            .param("avg", avg)
            .param("pctshow", "false")
            .param("pctmode", "false")
            .param("usecaption", "1");
        self.fetch_json(&endpoint).await
    }

    async fn manual_method(&self, method: &str, object_id: &str) -> Result<ManualResponse, ApiError> {
        if method.trim().is_empty() {
            return Err(ApiError::InvalidRequest("manual method is required".to_string()));
        }

        let mut endpoint = Endpoint::new(method.trim());
        if !object_id.is_empty() {
            endpoint = endpoint.param("id", object_id);
        }

        let raw: serde_json::Value = self.fetch_json(&endpoint).await?;
        let key_values = flatten_json(&raw);
        Ok(ManualResponse { raw, key_values })
    }
}
