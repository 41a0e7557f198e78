//! Per-query result cache keyed by a query fingerprint.

use super::{DataQuery, DataResponse, QueryKind, QueryModel};

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// Cache identity of a query.
///
/// Display-only settings (name prefixes, stream options) are not part of the
/// fingerprint, so queries differing only in those share one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint {
    ref_id: String,
    kind: String,
    target: String,
    channels: String,
    from_ms: i64,
    to_ms: i64,
    property: String,
    params: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalParams<'a> {
    group: &'a str,
    device: &'a str,
    sensor: &'a str,
    filter_property: &'a str,
    manual_method: &'a str,
    manual_object_id: &'a str,
}

impl QueryFingerprint {
    pub fn new(query: &DataQuery, model: &QueryModel, kind: &QueryKind) -> Self {
        let params = CanonicalParams {
            group: &model.group,
            device: &model.device,
            sensor: &model.sensor,
            filter_property: &model.filter_property,
            manual_method: &model.manual_method,
            manual_object_id: &model.manual_object_id,
        };

        Self {
            ref_id: query.ref_id.clone(),
            kind: kind.as_str().to_string(),
            target: model.sensor_id.clone(),
            channels: model.channels().join(","),
            from_ms: query.time_range.from.timestamp_millis(),
            to_ms: query.time_range.to.timestamp_millis(),
            property: model.property.clone(),
            params: serde_json::to_string(&params).unwrap_or_default(),
        }
    }
}

struct Entry {
    response: DataResponse,
    valid_until: Instant,
    ttl: Duration,
    /// Set while one caller recomputes the expired entry.
    claimed_at: Option<Instant>,
}

impl Entry {
    /// A claim lapses after one validity window, so a refresh that never
    /// reports back (aborted task, dropped request) cannot pin the stale result.
    fn claimed(&self, now: Instant) -> bool {
        self.claimed_at.is_some_and(|at| now < at + self.ttl)
    }
}

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum Lookup {
    /// Entry within its validity window.
    Fresh(DataResponse),
    /// Expired entry whose recomputation is already in flight elsewhere.
    Stale(DataResponse),
    /// Nothing usable. The caller must compute and then `store` or `abandon`.
    Miss,
}

/// Query result cache.
///
/// Entries are replaced wholesale and only dropped by [`QueryCache::clear`].
/// The in-flight claim is a hint: a concurrent identical query is served the
/// stale result while the first caller refreshes it, for at most one validity
/// window.
#[derive(Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<QueryFingerprint, Entry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lookup(&self, key: &QueryFingerprint) -> Lookup {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Lookup::Miss,
                Some(entry) if now < entry.valid_until => {
                    return Lookup::Fresh(entry.response.clone())
                }
                Some(entry) if entry.claimed(now) => return Lookup::Stale(entry.response.clone()),
                Some(_) => {}
            }
        }

        // Expired and unclaimed: claim the refresh.
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if now < entry.valid_until => Lookup::Fresh(entry.response.clone()),
            Some(entry) if entry.claimed(now) => Lookup::Stale(entry.response.clone()),
            Some(entry) => {
                entry.claimed_at = Some(now);
                Lookup::Miss
            }
            None => Lookup::Miss,
        }
    }

    pub async fn store(&self, key: QueryFingerprint, response: DataResponse, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            Entry {
                response,
                valid_until: Instant::now() + ttl,
                ttl,
                claimed_at: None,
            },
        );
    }

    /// Release a refresh claim after a failed recomputation.
    pub async fn abandon(&self, key: &QueryFingerprint) {
        if let Some(entry) = self.entries.write().await.get_mut(key) {
            entry.claimed_at = None;
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
