//! Error types for drishti-eye
//!
//! Per-cycle errors (`DetectionError`, `EncodeError`, `PublishError`) are
//! absorbed by the broadcaster. `CameraError` ends a capture session.
//! `QueryError` is handed back to whoever issued the query.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera {index}: {reason}")]
    OpenFailed { index: u32, reason: String },

    #[error("Camera capture already running")]
    AlreadyRunning,

    #[error("Failed to read frame: {0}")]
    ReadFailed(String),

    #[error("Invalid capture configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Frame buffer does not match {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },

    #[error("JPEG encode failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Detector not ready")]
    NotReady,

    #[error("Inference failed: {0}")]
    Inference(String),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Publish channel closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("No async runtime available for the broadcast loop")]
    NoRuntime,

    #[error("Broadcaster is still stopping")]
    Stopping,
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum AnswerError {
    #[error("Answer service error: {0}")]
    Llm(#[from] drishti_llm::LLMError),

    #[error("Could not prepare frame for the answer service: {0}")]
    Encode(#[from] EncodeError),
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("No frame available")]
    NoFrameAvailable,

    #[error("Question must not be empty")]
    EmptyQuestion,

    #[error(transparent)]
    Answerer(#[from] AnswerError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Umbrella error for the control surface
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
