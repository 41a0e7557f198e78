//! Instrumentation hooks.
//!
//! The client, router and stream manager report what they do through an
//! [`Observer`]. The shipped implementation turns every event into a debug-level
//! tracing event; a metrics backend can be plugged in behind the same trait.

use std::time::Duration;

/// Outcome of one upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
        }
    }
}

/// Receiver of instrumentation events.
pub trait Observer: Send + Sync {
    /// An upstream request finished (cache hits are not requests).
    fn api_request(&self, endpoint: &str, outcome: Outcome, elapsed: Duration);

    /// A cache was consulted. `layer` is `"upstream"` or `"query"`.
    fn cache_lookup(&self, layer: &str, key: &str, hit: bool);

    /// A query finished executing (cache hits excluded).
    fn query_completed(&self, kind: &str, elapsed: Duration, ok: bool);

    /// An error of the given kind was observed.
    fn error(&self, kind: &str);
}

/// Observer that emits tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn api_request(&self, endpoint: &str, outcome: Outcome, elapsed: Duration) {
        tracing::debug!(
            endpoint,
            outcome = outcome.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "PRTG API request"
        );
    }

    fn cache_lookup(&self, layer: &str, key: &str, hit: bool) {
        tracing::debug!(layer, key, hit, "Cache lookup");
    }

    fn query_completed(&self, kind: &str, elapsed: Duration, ok: bool) {
        tracing::debug!(kind, ok, elapsed_ms = elapsed.as_millis() as u64, "Query completed");
    }

    fn error(&self, kind: &str) {
        tracing::debug!(kind, "Error observed");
    }
}
