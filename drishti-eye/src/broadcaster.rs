//! Stream broadcaster: detect, annotate and publish the latest frame at a fixed rate
//!
//! The loop runs as one tokio task with an explicit lifecycle handle. Detection and
//! annotation are CPU work and go through `spawn_blocking`, so a slow detector
//! delays the stream but never stalls the runtime. Anything that fails inside
//! a cycle is counted, logged and skipped.

use crate::annotation::{AnnotationOptions, AnnotationPipeline, EncodedFrame};
use crate::camera::FrameFeed;
use crate::detection::{DetectionResult, DetectionThresholds, Detector};
use crate::error::{BroadcastError, PublishError};
use crate::frame::Frame;
use crate::perception::SharedPerceptionState;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Topic of published annotated frames
pub const VIDEO_FRAME_TOPIC: &str = "video_frame";

/// Retry delay after an empty read, shorter than any broadcast interval
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(10);
/// Idle interval while the frame source is unavailable
const UNAVAILABLE_BACKOFF: Duration = Duration::from_millis(500);
const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const PROGRESS_EVERY: u64 = 30;

/// One message on the publish channel, serialized once for all subscribers
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub topic: String,
    pub payload: serde_json::Value,
    text: String,
}

impl StreamMessage {
    pub fn new(topic: &str, payload: serde_json::Value) -> Result<Self, PublishError> {
        let text = serde_json::to_string(&Envelope { event: topic, data: &payload })?;
        Ok(Self {
            topic: topic.to_string(),
            payload,
            text,
        })
    }

    /// `{"event": topic, "data": payload}`
    pub fn as_json_text(&self) -> &str {
        &self.text
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    event: &'a str,
    data: &'a serde_json::Value,
}

/// Fan-out publish channel. Fire-and-forget for the caller.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError>;
}

/// [`Publisher`] over a tokio broadcast channel. Slow subscribers lag and
/// skip messages instead of holding back the stream.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<Arc<StreamMessage>>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StreamMessage>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(16)
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError> {
        let message = Arc::new(StreamMessage::new(topic, payload)?);
        // An error only means nobody is listening right now
        if self.sender.send(message).is_err() {
            debug!("No subscribers for {}", topic);
        }
        Ok(())
    }
}

/// Published on [`VIDEO_FRAME_TOPIC`]
#[derive(Debug, Serialize)]
pub struct VideoFramePayload<'a> {
    pub frame: String,
    pub detection_info: &'a DetectionResult,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcasterState {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Default)]
pub struct BroadcastStats {
    cycles: AtomicU64,
    frames_published: AtomicU64,
    empty_reads: AtomicU64,
    unavailable_waits: AtomicU64,
    detection_failures: AtomicU64,
    encode_failures: AtomicU64,
    publish_failures: AtomicU64,
    active_loops: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastStatsSnapshot {
    pub cycles: u64,
    pub frames_published: u64,
    pub empty_reads: u64,
    pub unavailable_waits: u64,
    pub detection_failures: u64,
    pub encode_failures: u64,
    pub publish_failures: u64,
    pub active_loops: usize,
}

impl BroadcastStats {
    pub fn snapshot(&self) -> BroadcastStatsSnapshot {
        BroadcastStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            empty_reads: self.empty_reads.load(Ordering::Relaxed),
            unavailable_waits: self.unavailable_waits.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            active_loops: self.active_loops(),
        }
    }

    /// Broadcast loops currently alive
    pub fn active_loops(&self) -> usize {
        self.active_loops.load(Ordering::Acquire)
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Broadcaster settings
#[derive(Debug, Clone)]
pub struct BroadcastOptions {
    pub interval: Duration,
    pub thresholds: DetectionThresholds,
    pub annotation: AnnotationOptions,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            thresholds: DetectionThresholds::default(),
            annotation: AnnotationOptions::default(),
        }
    }
}

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Lifecycle {
    state: BroadcasterState,
    handle: Option<LoopHandle>,
}

/// Everything one loop needs, cloned out of the broadcaster on start
struct CycleContext {
    feed: Arc<dyn FrameFeed>,
    detector: Option<Arc<dyn Detector>>,
    pipeline: Arc<AnnotationPipeline>,
    perception: Arc<SharedPerceptionState>,
    publisher: Arc<dyn Publisher>,
    thresholds: DetectionThresholds,
    stats: Arc<BroadcastStats>,
}

pub struct StreamBroadcaster {
    feed: Arc<dyn FrameFeed>,
    detector: Option<Arc<dyn Detector>>,
    pipeline: Arc<AnnotationPipeline>,
    perception: Arc<SharedPerceptionState>,
    publisher: Arc<dyn Publisher>,
    interval: Duration,
    thresholds: DetectionThresholds,
    stats: Arc<BroadcastStats>,
    lifecycle: Mutex<Lifecycle>,
}

impl StreamBroadcaster {
    pub fn new(
        feed: Arc<dyn FrameFeed>,
        perception: Arc<SharedPerceptionState>,
        publisher: Arc<dyn Publisher>,
        options: BroadcastOptions,
    ) -> Self {
        Self {
            feed,
            detector: None,
            pipeline: Arc::new(AnnotationPipeline::new(options.annotation)),
            perception,
            publisher,
            interval: options.interval.max(Duration::from_millis(1)),
            thresholds: options.thresholds,
            stats: Arc::new(BroadcastStats::default()),
            lifecycle: Mutex::new(Lifecycle {
                state: BroadcasterState::Idle,
                handle: None,
            }),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn state(&self) -> BroadcasterState {
        self.lifecycle.lock().state
    }

    pub fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    /// Launch the loop. Already running is success and starts nothing.
    pub fn start(&self) -> Result<(), BroadcastError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            BroadcasterState::Running => {
                debug!("Stream broadcaster already running");
                return Ok(());
            }
            BroadcasterState::Stopping => return Err(BroadcastError::Stopping),
            BroadcasterState::Idle => {}
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BroadcastError::NoRuntime)?;
        let ctx = Arc::new(CycleContext {
            feed: self.feed.clone(),
            detector: self.detector.clone(),
            pipeline: self.pipeline.clone(),
            perception: self.perception.clone(),
            publisher: self.publisher.clone(),
            thresholds: self.thresholds,
            stats: self.stats.clone(),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        // Counted before the task runs so a second start can never see zero
        self.stats.active_loops.fetch_add(1, Ordering::AcqRel);
        let task = runtime.spawn(run_loop(ctx, self.interval, shutdown_rx));

        lifecycle.state = BroadcasterState::Running;
        lifecycle.handle = Some(LoopHandle { shutdown, task });
        info!("Stream broadcaster started at {:?} per frame", self.interval);
        Ok(())
    }

    /// Signal the loop, let the current cycle finish and wait for it. No-op when idle.
    pub async fn stop(&self) {
        let handle = {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.handle.take() {
                Some(handle) => {
                    lifecycle.state = BroadcasterState::Stopping;
                    handle
                }
                None => return,
            }
        };

        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.task.await {
            if e.is_panic() {
                error!("Stream broadcaster task panicked");
            }
        }

        self.lifecycle.lock().state = BroadcasterState::Idle;
        info!("Stream broadcaster stopped");
    }
}

impl Drop for StreamBroadcaster {
    fn drop(&mut self) {
        if let Some(handle) = self.lifecycle.get_mut().handle.take() {
            let _ = handle.shutdown.send(true);
        }
    }
}

/// True if shutdown was signalled before `duration` elapsed
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}

async fn run_loop(ctx: Arc<CycleContext>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    // Overruns start the next cycle right away without bursting to catch up
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut wait_for_tick = true;
    let mut last_status = Instant::now();

    loop {
        if wait_for_tick {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
        }
        wait_for_tick = true;
        if *shutdown.borrow() {
            break;
        }

        if !ctx.feed.is_available() {
            BroadcastStats::bump(&ctx.stats.unavailable_waits);
            debug!("Frame source unavailable, idling");
            if sleep_or_shutdown(UNAVAILABLE_BACKOFF, &mut shutdown).await {
                break;
            }
            continue;
        }

        let Some(frame) = ctx.feed.latest_frame() else {
            BroadcastStats::bump(&ctx.stats.empty_reads);
            if sleep_or_shutdown(EMPTY_READ_BACKOFF, &mut shutdown).await {
                break;
            }
            wait_for_tick = false;
            continue;
        };

        ctx.run_cycle(frame).await;

        if last_status.elapsed() >= STATUS_INTERVAL {
            let stats = ctx.stats.snapshot();
            info!(
                "Broadcast status: {} cycles, {} published, {} detection failures, {} encode failures, {} publish failures",
                stats.cycles,
                stats.frames_published,
                stats.detection_failures,
                stats.encode_failures,
                stats.publish_failures
            );
            last_status = Instant::now();
        }
    }

    ctx.stats.active_loops.fetch_sub(1, Ordering::AcqRel);
    debug!("Broadcast loop exited");
}

impl CycleContext {
    async fn run_cycle(&self, frame: Frame) {
        BroadcastStats::bump(&self.stats.cycles);

        let detections = self.detect(&frame).await;
        let encoded = self.annotate(&frame, &detections).await;

        // Undecorated frame, even when encoding failed
        let timestamp = frame.timestamp_label();
        self.perception.update(frame, detections.clone());

        if let Some(encoded) = encoded {
            self.publish(&encoded, &detections, timestamp);
        }
    }

    async fn detect(&self, frame: &Frame) -> DetectionResult {
        let Some(detector) = self.detector.as_ref().filter(|d| d.is_ready()).cloned() else {
            return DetectionResult::empty();
        };
        let (width, height) = frame.dimensions();
        let thresholds = self.thresholds;
        let input = frame.clone();

        match tokio::task::spawn_blocking(move || detector.detect(&input, thresholds)).await {
            Ok(Ok(result)) => result.filtered(thresholds.confidence).clamped(width, height),
            Ok(Err(e)) => {
                BroadcastStats::bump(&self.stats.detection_failures);
                warn!("Detection failed, publishing without detections: {}", e);
                DetectionResult::empty()
            }
            Err(e) => {
                BroadcastStats::bump(&self.stats.detection_failures);
                warn!("Detector task failed, publishing without detections: {}", e);
                DetectionResult::empty()
            }
        }
    }

    async fn annotate(&self, frame: &Frame, detections: &DetectionResult) -> Option<EncodedFrame> {
        let pipeline = self.pipeline.clone();
        let (frame, detections) = (frame.clone(), detections.clone());

        match tokio::task::spawn_blocking(move || pipeline.process(&frame, &detections)).await {
            Ok(Ok(encoded)) => Some(encoded),
            Ok(Err(e)) => {
                BroadcastStats::bump(&self.stats.encode_failures);
                warn!("Encoding failed, skipping publish: {}", e);
                None
            }
            Err(e) => {
                BroadcastStats::bump(&self.stats.encode_failures);
                warn!("Annotation task failed, skipping publish: {}", e);
                None
            }
        }
    }

    fn publish(&self, encoded: &EncodedFrame, detections: &DetectionResult, timestamp: String) {
        let payload = VideoFramePayload {
            frame: encoded.data_uri(),
            detection_info: detections,
            timestamp,
        };
        let result = serde_json::to_value(&payload)
            .map_err(PublishError::from)
            .and_then(|value| self.publisher.publish(VIDEO_FRAME_TOPIC, value));

        match result {
            Ok(()) => {
                let published = BroadcastStats::bump(&self.stats.frames_published);
                if published % PROGRESS_EVERY == 0 {
                    info!("Published {} frames", published);
                }
            }
            Err(e) => {
                BroadcastStats::bump(&self.stats.publish_failures);
                warn!("Publish failed: {}", e);
            }
        }
    }
}
