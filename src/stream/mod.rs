//! Live streaming subscriptions.
//!
//! Each running stream owns a polling task that re-runs the metrics pipeline
//! on a jittered interval and pushes one frame per channel to its receiver.
//! Streams are keyed by panel, refId, sensor and channels; a second run for a
//! live key only refreshes the existing poller.

mod buffer;

pub use buffer::*;

use crate::frame::{display_name, Assembler, Field, FieldValues, Frame, FrameMeta, FrameType};
use crate::observer::Observer;
use crate::query::{QueryError, QueryModel, TimeRange};

use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

/// Concurrent streams allowed per panel.
pub const MAX_STREAMS_PER_PANEL: usize = 5;

pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Minimum spacing between upstream polls when no interval is requested.
pub const DEFAULT_SUPPRESSION: Duration = Duration::from_secs(5);

/// Stream paths must carry this prefix.
pub const STREAM_PATH_PREFIX: &str = "prtg-stream/";

const MAX_JITTER_MS: u64 = 250;
const DEFAULT_WINDOW_MINUTES: i64 = 30;

/// Stream error types.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("unknown stream path: {0}")]
    NotFound(String),
    #[error("failed to parse stream data: {0}")]
    InvalidData(#[from] serde_json::Error),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("poll timed out after {0:?}")]
    PollTimeout(Duration),
    #[error("maximum streams reached for panel {0}")]
    PanelQuota(String),
}

/// Answer to subscribe and publish requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamStatus {
    #[serde(rename = "OK")]
    Ok,
    NotFound,
    PermissionDenied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Fixed window; new points are appended to the buffer.
    Append,
    /// Window follows "now"; the buffer mirrors the current window.
    Sliding,
}

impl UpdateMode {
    pub fn parse(name: &str) -> Self {
        match name {
            "sliding" => UpdateMode::Sliding,
            _ => UpdateMode::Append,
        }
    }
}

/// What a run request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new poller was started.
    Started,
    /// The key was already live; its window was refreshed instead.
    Nudged,
}

/// Poll interval for a requested interval in milliseconds, clamped to
/// [`MIN_INTERVAL`, `MAX_INTERVAL`].
pub fn bounded_interval(requested_ms: i64) -> Duration {
    if requested_ms <= 0 {
        return DEFAULT_INTERVAL;
    }
    Duration::from_millis(requested_ms as u64).clamp(MIN_INTERVAL, MAX_INTERVAL)
}

/// Half the requested interval, at least one second and never longer than the
/// poll interval itself.
pub fn suppression_window(requested_ms: i64) -> Duration {
    if requested_ms <= 0 {
        return DEFAULT_SUPPRESSION;
    }
    Duration::from_millis(requested_ms as u64 / 2)
        .max(Duration::from_secs(1))
        .min(bounded_interval(requested_ms))
}

pub fn stream_key(model: &QueryModel, channels: &[String]) -> String {
    format!(
        "{}_{}_{}_{}",
        model.panel_id,
        model.ref_id,
        model.sensor_id,
        channels.join("_")
    )
}

fn initial_window(model: &QueryModel) -> TimeRange {
    if model.from > 0 && model.to > 0 {
        if let (Some(from), Some(to)) = (
            Utc.timestamp_millis_opt(model.from).single(),
            Utc.timestamp_millis_opt(model.to).single(),
        ) {
            return TimeRange::new(from, to);
        }
    }
    let now = Utc::now();
    TimeRange::new(now - chrono::Duration::minutes(DEFAULT_WINDOW_MINUTES), now)
}

fn should_log_failure(count: u32) -> bool {
    count <= 3 || count % 10 == 0
}

fn validate(model: &QueryModel) -> Result<Vec<String>, StreamError> {
    if model.sensor_id.is_empty() {
        return Err(StreamError::MissingField("sensorId"));
    }
    let channels = model.channels();
    if channels.is_empty() {
        return Err(StreamError::MissingField("channel or channelArray"));
    }
    Ok(channels)
}

struct StreamHandle {
    window: watch::Sender<TimeRange>,
}

/// Flat and per-panel views of the live streams, always mutated together.
#[derive(Default)]
struct Registry {
    streams: HashMap<String, StreamHandle>,
    by_panel: HashMap<String, HashSet<String>>,
}

impl Registry {
    fn insert(&mut self, key: &str, panel_id: &str, handle: StreamHandle) {
        self.streams.insert(key.to_string(), handle);
        self.by_panel
            .entry(panel_id.to_string())
            .or_default()
            .insert(key.to_string());
    }

    fn remove(&mut self, key: &str, panel_id: &str) {
        self.streams.remove(key);
        if let Some(keys) = self.by_panel.get_mut(panel_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_panel.remove(panel_id);
            }
        }
    }

    fn panel_count(&self, panel_id: &str) -> usize {
        self.by_panel.get(panel_id).map(HashSet::len).unwrap_or(0)
    }
}

/// Owns every live stream of one connector instance.
pub struct StreamManager {
    assembler: Assembler,
    registry: Arc<RwLock<Registry>>,
    shutdown: broadcast::Sender<()>,
    observer: Arc<dyn Observer>,
}

impl StreamManager {
    pub fn new(assembler: Assembler, observer: Arc<dyn Observer>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            assembler,
            registry: Arc::new(RwLock::new(Registry::default())),
            shutdown,
            observer,
        }
    }

    /// Validate a subscription request and enforce the per-panel quota.
    pub async fn subscribe(&self, path: &str, data: &serde_json::Value) -> StreamStatus {
        tracing::debug!(path, "Subscribe to stream");

        if !path.starts_with(STREAM_PATH_PREFIX) {
            return StreamStatus::NotFound;
        }

        let model: QueryModel = match serde_json::from_value(data.clone()) {
            Ok(model) => model,
            Err(e) => {
                tracing::error!("Invalid subscription data: {}", e);
                return StreamStatus::PermissionDenied;
            }
        };

        if let Err(e) = validate(&model) {
            tracing::error!(sensor_id = %model.sensor_id, "Rejecting subscription: {}", e);
            return StreamStatus::PermissionDenied;
        }

        let registry = self.registry.read().await;
        if registry.panel_count(&model.panel_id) >= MAX_STREAMS_PER_PANEL {
            tracing::warn!(panel_id = %model.panel_id, "Maximum streams reached for panel");
            return StreamStatus::PermissionDenied;
        }

        StreamStatus::Ok
    }

    /// Start polling for a stream, or refresh it if its key is already live.
    /// A new key is refused once its panel holds [`MAX_STREAMS_PER_PANEL`] streams.
    ///
    /// The poller stops when `sender`'s receiver is dropped or the manager is
    /// shut down, and then removes itself from the registry.
    pub async fn run(
        &self,
        path: &str,
        data: &serde_json::Value,
        sender: mpsc::Sender<Frame>,
    ) -> Result<RunOutcome, StreamError> {
        if !path.starts_with(STREAM_PATH_PREFIX) {
            return Err(StreamError::NotFound(path.to_string()));
        }

        let model: QueryModel = serde_json::from_value(data.clone())?;
        let channels = validate(&model)?;
        let key = stream_key(&model, &channels);
        let window = initial_window(&model);

        let mut registry = self.registry.write().await;
        if let Some(handle) = registry.streams.get(&key) {
            // Refreshes the window and forces an immediate poll.
            handle.window.send_replace(window);
            tracing::info!(stream_id = %key, "Refreshing running stream");
            return Ok(RunOutcome::Nudged);
        }

        if registry.panel_count(&model.panel_id) >= MAX_STREAMS_PER_PANEL {
            tracing::warn!(panel_id = %model.panel_id, "Maximum streams reached for panel");
            return Err(StreamError::PanelQuota(model.panel_id.clone()));
        }

        let (window_tx, window_rx) = watch::channel(window);
        registry.insert(&key, &model.panel_id, StreamHandle { window: window_tx });
        drop(registry);

        let stream = ActiveStream::new(key.clone(), model, channels, window);
        tracing::info!(
            stream_id = %key,
            interval_ms = stream.interval.as_millis() as u64,
            "Stream starting"
        );

        let registry = self.registry.clone();
        let assembler = self.assembler.clone();
        let observer = self.observer.clone();
        let shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let panel_id = stream.model.panel_id.clone();
            run_poll_loop(stream, assembler, sender, window_rx, shutdown_rx, observer).await;

            // Clean up when done
            registry.write().await.remove(&key, &panel_id);
            tracing::debug!(stream_id = %key, "Stream closed");
        });

        Ok(RunOutcome::Started)
    }

    /// Streams are read-only.
    pub fn publish(&self, path: &str) -> StreamStatus {
        tracing::debug!(path, "Rejecting publish");
        StreamStatus::PermissionDenied
    }

    pub async fn active_streams(&self) -> usize {
        self.registry.read().await.streams.len()
    }

    pub async fn panel_streams(&self, panel_id: &str) -> usize {
        self.registry.read().await.panel_count(panel_id)
    }

    /// Stop every running stream.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

struct ActiveStream {
    key: String,
    model: QueryModel,
    channels: Vec<String>,
    interval: Duration,
    suppression: Duration,
    mode: UpdateMode,
    window: TimeRange,
    buffers: HashMap<String, SeriesBuffer>,
    last_poll: Option<Instant>,
    errors: u32,
}

impl ActiveStream {
    fn new(key: String, model: QueryModel, channels: Vec<String>, window: TimeRange) -> Self {
        let buffers = channels
            .iter()
            .map(|c| (c.clone(), SeriesBuffer::new(BUFFER_CAPACITY)))
            .collect();
        Self {
            key,
            interval: bounded_interval(model.stream_interval),
            suppression: suppression_window(model.stream_interval),
            mode: UpdateMode::parse(&model.update_mode),
            model,
            channels,
            window,
            buffers,
            last_poll: None,
            errors: 0,
        }
    }

    /// Move the window to end at `now`, keeping its length.
    fn slide(&mut self) {
        let span = self.window.duration();
        let now = Utc::now();
        self.window = TimeRange::new(now - span, now);
    }

    async fn poll(&mut self, assembler: &Assembler, sender: &mpsc::Sender<Frame>) -> Result<(), StreamError> {
        if let Some(last) = self.last_poll {
            if last.elapsed() < self.suppression {
                return Ok(());
            }
        }
        let started = Instant::now();
        let budget = self.interval / 2;
        let series = tokio::time::timeout(budget, assembler.series(&self.model, self.window))
            .await
            .map_err(|_| StreamError::PollTimeout(budget))??;
        self.last_poll = Some(started);

        for s in series {
            let Some(buffer) = self.buffers.get_mut(&s.channel) else {
                continue;
            };
            match self.mode {
                UpdateMode::Append => {
                    buffer.append_newer(&s.times, &s.values);
                }
                UpdateMode::Sliding => buffer.replace(&s.times, &s.values),
            }

            let frame = self.frame(&s.channel);
            if sender.send(frame).await.is_err() {
                break;
            }
        }

        Ok(())
    }

    fn frame(&self, channel: &str) -> Frame {
        let empty = SeriesBuffer::default();
        let buffer = self.buffers.get(channel).unwrap_or(&empty);

        let meta = FrameMeta::new(FrameType::TimeSeriesMulti)
            .with("streaming", true)
            .with("live", true)
            .with("channel", channel)
            .with("from", self.window.from.timestamp_millis())
            .with("to", self.window.to.timestamp_millis())
            .with("streaming_rate", self.interval.as_millis() as u64)
            .with("dataPoints", buffer.len())
            .with("lastValue", buffer.last_value())
            .with("streamId", self.key.as_str())
            .with("state", "streaming");

        Frame::new(format!("stream_{}_{}", self.model.sensor_id, channel))
            .with_field(Field::new("Time", FieldValues::Time(buffer.times())))
            .with_field(
                Field::new("Value", FieldValues::Number(buffer.values()))
                    .with_display_name(display_name(&self.model, channel)),
            )
            .with_meta(meta)
    }

    fn record(&mut self, result: Result<(), StreamError>, observer: &dyn Observer) {
        match result {
            Ok(()) => self.errors = 0,
            Err(e) => {
                self.errors += 1;
                observer.error("stream_update");
                if should_log_failure(self.errors) {
                    tracing::error!(
                        stream_id = %self.key,
                        count = self.errors,
                        "Stream update failed: {}",
                        e
                    );
                }
            }
        }
    }
}

/// Poll until the receiver goes away or the manager shuts down.
async fn run_poll_loop(
    mut stream: ActiveStream,
    assembler: Assembler,
    sender: mpsc::Sender<Frame>,
    mut window_rx: watch::Receiver<TimeRange>,
    mut shutdown_rx: broadcast::Receiver<()>,
    observer: Arc<dyn Observer>,
) {
    let jitter = Duration::from_millis(rand::random::<u64>() % MAX_JITTER_MS);
    let mut ticker = tokio::time::interval(stream.interval + jitter);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!(
        stream_id = %stream.key,
        channels = stream.channels.len(),
        "Stream poll loop started"
    );

    loop {
        tokio::select! {
            biased;
            _ = sender.closed() => break,
            _ = shutdown_rx.recv() => break,
            changed = window_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                stream.window = *window_rx.borrow_and_update();
                stream.last_poll = None;
                let result = stream.poll(&assembler, &sender).await;
                stream.record(result, observer.as_ref());
            }
            _ = ticker.tick() => {
                if stream.mode == UpdateMode::Sliding {
                    stream.slide();
                }
                let result = stream.poll(&assembler, &sender).await;
                stream.record(result, observer.as_ref());
            }
        }
    }
}
