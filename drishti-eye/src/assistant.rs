//! The vision assistant context: one owned object holding the capture session,
//! the perception cache, the broadcaster and the query handlers

use crate::annotation::AnnotationOptions;
use crate::answerer::{Answerer, OfflineAnswerer, VisionLanguageAnswerer};
use crate::broadcaster::{BroadcastOptions, BroadcastPublisher, BroadcastStatsSnapshot, StreamBroadcaster, StreamMessage};
use crate::camera::{CameraInfo, CaptureBackend, FrameSource, SyntheticBackend};
use crate::config::AssistantConfig;
use crate::detection::{DemoDetector, DetectedObject, DetectionThresholds, Detector};
use crate::error::{CameraError, VisionError};
use crate::perception::SharedPerceptionState;
use crate::query::{AnswerResponse, CaptureResponse, QueryHandlers, SceneAnalysis};
use drishti_llm::VisionChatClient;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

/// Messages buffered per subscriber before it starts lagging
const SUBSCRIBER_BUFFER: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub summary: String,
    pub object_count: usize,
    pub objects: Vec<DetectedObject>,
}

pub struct VisionAssistant {
    config: AssistantConfig,
    frame_source: Arc<FrameSource>,
    perception: Arc<SharedPerceptionState>,
    broadcaster: StreamBroadcaster,
    queries: QueryHandlers,
    publisher: BroadcastPublisher,
    /// Serializes start and stop
    control: Mutex<()>,
}

impl VisionAssistant {
    pub fn new(
        config: AssistantConfig,
        backend: Arc<dyn CaptureBackend>,
        detector: Option<Arc<dyn Detector>>,
        answerer: Arc<dyn Answerer>,
    ) -> Self {
        let frame_source = Arc::new(FrameSource::new(backend));
        let perception = Arc::new(SharedPerceptionState::new());
        let publisher = BroadcastPublisher::new(SUBSCRIBER_BUFFER);
        let annotation = AnnotationOptions::for_stream(&config.capture, &config.detection);

        let options = BroadcastOptions {
            interval: config.capture.broadcast_interval(),
            thresholds: DetectionThresholds::from(&config.detection),
            annotation: annotation.clone(),
        };
        let mut broadcaster =
            StreamBroadcaster::new(frame_source.clone(), perception.clone(), Arc::new(publisher.clone()), options);
        if let Some(detector) = detector {
            broadcaster = broadcaster.with_detector(detector);
        }

        let queries = QueryHandlers::new(perception.clone(), answerer, config.captures_dir.clone(), annotation);

        Self {
            config,
            frame_source,
            perception,
            broadcaster,
            queries,
            publisher,
            control: Mutex::new(()),
        }
    }

    /// Wire up backends from configuration
    pub fn from_config(config: AssistantConfig) -> Result<Self, VisionError> {
        config.validate().map_err(VisionError::Config)?;

        let (backend, detector): (Arc<dyn CaptureBackend>, Option<Arc<dyn Detector>>) = if config.demo {
            info!("Demo mode: synthetic camera with demo detector");
            (Arc::new(SyntheticBackend), Some(Arc::new(DemoDetector)))
        } else {
            (camera_backend(), None)
        };

        let answerer: Arc<dyn Answerer> = if config.chat.has_api_key() {
            let client = VisionChatClient::new(config.chat.clone())
                .map_err(|e| VisionError::Config(e.to_string()))?;
            info!("Answering with {} at {}", config.chat.model, config.chat.base_url);
            Arc::new(VisionLanguageAnswerer::new(client).with_image_settings(
                config.capture.jpeg_quality,
                config.capture.max_width,
                config.capture.max_height,
            ))
        } else {
            warn!("No API key configured, answers will use detections only");
            Arc::new(OfflineAnswerer)
        };

        Ok(Self::new(config, backend, detector, answerer))
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    pub fn perception(&self) -> &SharedPerceptionState {
        &self.perception
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StreamMessage>> {
        self.publisher.subscribe()
    }

    pub fn broadcast_stats(&self) -> BroadcastStatsSnapshot {
        self.broadcaster.stats().snapshot()
    }

    /// Open the camera, then start broadcasting
    pub async fn start_capture(&self) -> Result<(), VisionError> {
        let _guard = self.control.lock().await;

        let source = self.frame_source.clone();
        let capture = self.config.capture.clone();
        // Opening a device can block for a while
        tokio::task::spawn_blocking(move || source.start(&capture))
            .await
            .map_err(|e| CameraError::OpenFailed {
                index: self.config.capture.device_index,
                reason: format!("camera open task failed: {}", e),
            })??;

        if let Err(e) = self.broadcaster.start() {
            self.stop_frame_source().await;
            return Err(e.into());
        }
        info!("Capture started");
        Ok(())
    }

    /// Stop broadcasting, release the camera and forget the last snapshot
    pub async fn stop_capture(&self) {
        let _guard = self.control.lock().await;
        self.broadcaster.stop().await;
        self.stop_frame_source().await;
        self.perception.reset();
        info!("Capture stopped");
    }

    async fn stop_frame_source(&self) {
        let source = self.frame_source.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || source.stop()).await {
            warn!("Camera stop task failed: {}", e);
        }
    }

    pub fn camera_info(&self) -> CameraInfo {
        self.frame_source.info()
    }

    pub fn is_capturing(&self) -> bool {
        self.frame_source.is_available()
    }

    pub fn detection_summary(&self) -> DetectionSummary {
        match self.perception.read() {
            Some(snapshot) => DetectionSummary {
                summary: snapshot.detections.summary(),
                object_count: snapshot.detections.object_count(),
                objects: snapshot.detections.objects,
            },
            None => DetectionSummary {
                summary: "No objects detected".to_string(),
                object_count: 0,
                objects: Vec::new(),
            },
        }
    }

    pub async fn ask_question(&self, question: &str) -> Result<AnswerResponse, VisionError> {
        Ok(self.queries.ask_question(question).await?)
    }

    pub async fn analyze_scene(&self) -> Result<SceneAnalysis, VisionError> {
        Ok(self.queries.analyze_scene().await?)
    }

    pub async fn capture_image(&self) -> Result<CaptureResponse, VisionError> {
        Ok(self.queries.capture_image().await?)
    }
}

#[cfg(feature = "opencv")]
fn camera_backend() -> Arc<dyn CaptureBackend> {
    Arc::new(crate::camera::OpenCvBackend)
}

#[cfg(not(feature = "opencv"))]
fn camera_backend() -> Arc<dyn CaptureBackend> {
    warn!("Built without the opencv feature, using the synthetic camera");
    Arc::new(SyntheticBackend)
}
