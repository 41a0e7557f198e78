//! Query dispatch: classification, caching and batch limits.

use super::{DataQuery, DataResponse, Lookup, QueryCache, QueryError, QueryFingerprint, QueryKind, QueryModel, TimeRange};
use crate::frame::Assembler;
use crate::observer::Observer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Largest batch accepted in one request.
pub const MAX_CONCURRENT_QUERIES: usize = 25;

const SHORT_RANGE_TTL: Duration = Duration::from_secs(6);
const DAY_RANGE_TTL: Duration = Duration::from_secs(30);

pub struct QueryRouter {
    assembler: Assembler,
    cache: QueryCache,
    base_ttl: Duration,
    observer: Arc<dyn Observer>,
}

impl QueryRouter {
    pub fn new(assembler: Assembler, base_ttl: Duration, observer: Arc<dyn Observer>) -> Self {
        Self {
            assembler,
            cache: QueryCache::new(),
            base_ttl,
            observer,
        }
    }

    /// Run a batch. Queries run concurrently; results are keyed by refId.
    ///
    /// A batch above [`MAX_CONCURRENT_QUERIES`] is rejected as a whole with one
    /// error response under the first refId.
    pub async fn query_data(self: &Arc<Self>, queries: Vec<DataQuery>) -> HashMap<String, DataResponse> {
        let mut results = HashMap::new();

        if queries.len() > MAX_CONCURRENT_QUERIES {
            let err = QueryError::TooManyQueries {
                count: queries.len(),
                limit: MAX_CONCURRENT_QUERIES,
            };
            tracing::warn!(count = queries.len(), "Rejecting query batch: {}", err);
            self.observer.error("too_many_queries");
            let ref_id = queries.first().map(|q| q.ref_id.clone()).unwrap_or_default();
            results.insert(ref_id, DataResponse::from(&err));
            return results;
        }

        let mut tasks = JoinSet::new();
        for query in queries {
            let router = Arc::clone(self);
            tasks.spawn(async move {
                let ref_id = query.ref_id.clone();
                (ref_id, router.query(query).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ref_id, response)) => {
                    results.insert(ref_id, response);
                }
                Err(e) => tracing::error!("Query task failed: {}", e),
            }
        }

        results
    }

    /// Run a single query, consulting the cache first.
    pub async fn query(&self, query: DataQuery) -> DataResponse {
        let start = Instant::now();

        let model: QueryModel = match serde_json::from_value(query.json.clone()) {
            Ok(model) => model,
            Err(e) => {
                let err = QueryError::from(e);
                tracing::error!(ref_id = %query.ref_id, "Query parsing failed: {}", err);
                self.observer.error("query_parse_error");
                return DataResponse::from(&err);
            }
        };

        let kind_name = if model.query_type.is_empty() {
            &query.query_type
        } else {
            &model.query_type
        };
        let kind = QueryKind::parse(kind_name);

        if let QueryKind::Unknown(name) = &kind {
            tracing::warn!(ref_id = %query.ref_id, query_type = %name, "Unknown query type");
            self.observer.error("unknown_query_type");
            return DataResponse::ok(Vec::new());
        }

        let key = QueryFingerprint::new(&query, &model, &kind);
        match self.cache.lookup(&key).await {
            Lookup::Fresh(response) => {
                self.observer.cache_lookup("query", kind.as_str(), true);
                tracing::debug!(ref_id = %query.ref_id, "Serving query from cache");
                return response;
            }
            Lookup::Stale(response) => {
                self.observer.cache_lookup("query", kind.as_str(), true);
                tracing::debug!(ref_id = %query.ref_id, "Serving stale result while refresh is in flight");
                return response;
            }
            Lookup::Miss => self.observer.cache_lookup("query", kind.as_str(), false),
        }

        let result = match &kind {
            QueryKind::Metrics => self.assembler.metrics(&model, query.time_range).await,
            QueryKind::Manual => self.assembler.manual(&model, &query.ref_id).await,
            QueryKind::Text => self.assembler.property(&model, false, &query.ref_id).await,
            QueryKind::Raw => self.assembler.property(&model, true, &query.ref_id).await,
            QueryKind::Unknown(_) => Ok(Vec::new()),
        };

        let elapsed = start.elapsed();
        self.observer.query_completed(kind.as_str(), elapsed, result.is_ok());

        match result {
            Ok(frames) => {
                let response = DataResponse::ok(frames);
                let ttl = self.validity(&kind, &query.time_range);
                self.cache.store(key, response.clone(), ttl).await;
                tracing::info!(
                    ref_id = %query.ref_id,
                    query_type = kind.as_str(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Query completed"
                );
                response
            }
            Err(e) => {
                self.cache.abandon(&key).await;
                tracing::error!(
                    ref_id = %query.ref_id,
                    query_type = kind.as_str(),
                    "Query execution failed: {}",
                    e
                );
                self.observer.error("query_execution");
                DataResponse::from(&e)
            }
        }
    }

    /// How long a computed result stays valid.
    ///
    /// Short windows refresh quickly so near-real-time panels stay current.
    pub fn validity(&self, kind: &QueryKind, range: &TimeRange) -> Duration {
        if *kind == QueryKind::Manual {
            return self.base_ttl;
        }
        let span = range.duration();
        if span <= chrono::Duration::hours(1) {
            SHORT_RANGE_TTL
        } else if span <= chrono::Duration::hours(24) {
            DAY_RANGE_TTL
        } else {
            self.base_ttl
        }
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }
}
