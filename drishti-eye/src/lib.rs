//! drishti-eye: live camera perception for a vision assistant
//!
//! Captures frames from a camera, runs detection and annotation at a fixed
//! broadcast rate, publishes annotated frames to display clients, and answers
//! on-demand questions about the current scene through a vision-language
//! service.

pub mod annotation;
pub mod answerer;
pub mod assistant;
pub mod broadcaster;
pub mod camera;
pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod perception;
pub mod query;
pub mod server;

pub use annotation::{AnnotationOptions, AnnotationPipeline, EncodedFrame};
pub use answerer::{Answerer, OfflineAnswerer, SafetyLevel, SafetyReport, VisionLanguageAnswerer};
pub use assistant::{DetectionSummary, VisionAssistant};
pub use broadcaster::{BroadcastPublisher, BroadcasterState, Publisher, StreamBroadcaster, VIDEO_FRAME_TOPIC};
pub use camera::{CameraInfo, CaptureBackend, CaptureDevice, FrameFeed, FrameSource, SyntheticBackend};
pub use config::{AssistantConfig, CaptureConfig, DetectionConfig, ServerConfig};
pub use detection::{BoundingBox, DemoDetector, DetectedObject, DetectionResult, Detector};
pub use error::{CameraError, QueryError, VisionError};
pub use frame::{ChannelOrder, Frame};
pub use perception::{PerceptionSnapshot, SharedPerceptionState};
pub use query::QueryHandlers;
