//! On-demand queries against the current perception snapshot

use crate::annotation::{encode_jpeg, resize_to_fit, AnnotationOptions, AnnotationPipeline};
use crate::answerer::{Answerer, SafetyReport};
use crate::error::{PersistError, QueryError};
use crate::frame::TIMESTAMP_FORMAT;
use crate::perception::{PerceptionSnapshot, SharedPerceptionState};
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub question: String,
    pub answer: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneAnalysis {
    pub description: String,
    pub safety: SafetyReport,
    pub detection_summary: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureResponse {
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    /// Downscaled data URI for display
    pub image: String,
    pub timestamp: String,
}

fn response_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Capture file name for the current instant, millisecond resolution
pub fn capture_filename() -> String {
    format!("capture_{}.jpg", Local::now().format("%Y%m%d_%H%M%S_%3f"))
}

pub struct QueryHandlers {
    perception: Arc<SharedPerceptionState>,
    answerer: Arc<dyn Answerer>,
    captures_dir: PathBuf,
    capture_pipeline: AnnotationPipeline,
    display_size: (u32, u32),
}

impl QueryHandlers {
    /// `stream_options` supplies overlay switches, display bounds and quality;
    /// captures are written at full resolution.
    pub fn new(
        perception: Arc<SharedPerceptionState>,
        answerer: Arc<dyn Answerer>,
        captures_dir: impl Into<PathBuf>,
        stream_options: AnnotationOptions,
    ) -> Self {
        let display_size = stream_options.max_size.unwrap_or((1280, 720));
        Self {
            perception,
            answerer,
            captures_dir: captures_dir.into(),
            capture_pipeline: AnnotationPipeline::new(stream_options.full_resolution()),
            display_size,
        }
    }

    pub fn captures_dir(&self) -> &Path {
        &self.captures_dir
    }

    fn snapshot(&self) -> Result<PerceptionSnapshot, QueryError> {
        self.perception.read().ok_or(QueryError::NoFrameAvailable)
    }

    pub async fn ask_question(&self, question: &str) -> Result<AnswerResponse, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }
        let snapshot = self.snapshot()?;
        info!("Answering question: {}", question);

        let answer = self
            .answerer
            .answer(&snapshot.frame, question, &snapshot.detections)
            .await?;
        Ok(AnswerResponse {
            question: question.to_string(),
            answer,
            timestamp: response_timestamp(),
        })
    }

    /// Scene description and safety check, issued together
    pub async fn analyze_scene(&self) -> Result<SceneAnalysis, QueryError> {
        let snapshot = self.snapshot()?;
        info!("Analyzing scene with {} detections", snapshot.detections.object_count());

        let (description, safety) = tokio::join!(
            self.answerer.describe_scene(&snapshot.frame, &snapshot.detections),
            self.answerer.check_safety(&snapshot.frame, &snapshot.detections),
        );
        Ok(SceneAnalysis {
            description: description?,
            safety: safety?,
            detection_summary: snapshot.detections.summary(),
            timestamp: response_timestamp(),
        })
    }

    /// Write the annotated snapshot to `captures_dir` and return a display copy
    pub async fn capture_image(&self) -> Result<CaptureResponse, QueryError> {
        let snapshot = self.snapshot()?;
        let options = self.capture_pipeline.options();

        let rendered = self.capture_pipeline.render(&snapshot.frame, &snapshot.detections);
        let file_bytes = encode_jpeg(&rendered, options.jpeg_quality)?.bytes;
        let display = resize_to_fit(rendered, self.display_size.0, self.display_size.1);
        let image = encode_jpeg(&display, options.jpeg_quality)?.data_uri();

        let filename = capture_filename();
        let path = self.captures_dir.join(&filename);
        persist(&self.captures_dir, &path, &file_bytes).await?;
        info!("Captured image saved to {}", path.display());

        Ok(CaptureResponse {
            filename,
            path,
            image,
            timestamp: response_timestamp(),
        })
    }
}

async fn persist(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    tokio::fs::create_dir_all(dir).await.map_err(|source| {
        warn!("Cannot create captures directory {}: {}", dir.display(), source);
        PersistError::Io { path: dir.to_path_buf(), source }
    })?;
    tokio::fs::write(path, bytes).await.map_err(|source| {
        warn!("Cannot write capture {}: {}", path.display(), source);
        PersistError::Io { path: path.to_path_buf(), source }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answerer::{MockAnswerer, SafetyLevel};
    use crate::detection::{BoundingBox, DetectedObject, DetectionResult};
    use crate::error::AnswerError;
    use crate::frame::Frame;
    use drishti_llm::LLMError;
    use image::{Rgb, RgbImage};

    fn state_with_frame() -> Arc<SharedPerceptionState> {
        let state = Arc::new(SharedPerceptionState::new());
        let frame = Frame::from_rgb_image(RgbImage::from_pixel(1280, 720, Rgb([50, 80, 110])));
        let detections = DetectionResult::new(vec![DetectedObject::new(
            "person",
            0.9,
            BoundingBox::new(100, 100, 300, 500),
        )]);
        state.update(frame, detections);
        state
    }

    fn handlers(state: Arc<SharedPerceptionState>, answerer: MockAnswerer, dir: &Path) -> QueryHandlers {
        let options = AnnotationOptions { max_size: Some((640, 480)), ..AnnotationOptions::default() };
        QueryHandlers::new(state, Arc::new(answerer), dir, options)
    }

    #[tokio::test]
    async fn test_no_frame_available() {
        let dir = tempfile::tempdir().unwrap();
        let mut answerer = MockAnswerer::new();
        answerer.expect_answer().never();
        let handlers = handlers(Arc::new(SharedPerceptionState::new()), answerer, dir.path());

        assert!(matches!(handlers.ask_question("What?").await, Err(QueryError::NoFrameAvailable)));
        assert!(matches!(handlers.analyze_scene().await, Err(QueryError::NoFrameAvailable)));
        assert!(matches!(handlers.capture_image().await, Err(QueryError::NoFrameAvailable)));
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut answerer = MockAnswerer::new();
        answerer.expect_answer().never();
        let handlers = handlers(state_with_frame(), answerer, dir.path());
        assert!(matches!(handlers.ask_question("   ").await, Err(QueryError::EmptyQuestion)));
    }

    #[tokio::test]
    async fn test_answer_is_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut answerer = MockAnswerer::new();
        answerer
            .expect_answer()
            .withf(|frame, question, detections| {
                frame.dimensions() == (1280, 720) && question.to_string() == "Who is here?" && detections.object_count() == 1
            })
            .times(1)
            .returning(|_, _, _| Ok("  One person, standing.\n".to_string()));
        let handlers = handlers(state_with_frame(), answerer, dir.path());

        let response = handlers.ask_question(" Who is here? ").await.unwrap();
        assert_eq!(response.question, "Who is here?");
        assert_eq!(response.answer, "  One person, standing.\n");
        assert_eq!(response.timestamp.len(), "2024-01-01 00:00:00".len());
    }

    #[tokio::test]
    async fn test_answerer_failure_is_structured() {
        let dir = tempfile::tempdir().unwrap();
        let mut answerer = MockAnswerer::new();
        answerer
            .expect_answer()
            .returning(|_, _, _| Err(AnswerError::Llm(LLMError::RateLimit)));
        let handlers = handlers(state_with_frame(), answerer, dir.path());
        let err = handlers.ask_question("Anything?").await.unwrap_err();
        assert!(matches!(err, QueryError::Answerer(AnswerError::Llm(LLMError::RateLimit))));
    }

    #[tokio::test]
    async fn test_analyze_scene() {
        let dir = tempfile::tempdir().unwrap();
        let mut answerer = MockAnswerer::new();
        answerer
            .expect_describe_scene()
            .returning(|_, _| Ok("An office.".to_string()));
        answerer
            .expect_check_safety()
            .returning(|_, _| Ok(SafetyReport::classify("Be careful of the cable.".to_string())));
        let handlers = handlers(state_with_frame(), answerer, dir.path());

        let analysis = handlers.analyze_scene().await.unwrap();
        assert_eq!(analysis.description, "An office.");
        assert_eq!(analysis.safety.level, SafetyLevel::Medium);
        assert_eq!(analysis.detection_summary, "Detected: 1 person");
    }

    #[tokio::test]
    async fn test_capture_writes_full_resolution_file() {
        let dir = tempfile::tempdir().unwrap();
        let captures = dir.path().join("static").join("captures");
        let handlers = handlers(state_with_frame(), MockAnswerer::new(), &captures);

        let response = handlers.capture_image().await.unwrap();
        assert!(response.filename.starts_with("capture_"));
        assert!(response.filename.ends_with(".jpg"));
        assert_eq!(response.path, captures.join(&response.filename));

        let saved = image::open(&response.path).unwrap();
        assert_eq!((saved.width(), saved.height()), (1280, 720));
        assert!(response.image.starts_with("data:image/jpeg;base64,"));

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("path").is_none());
    }

    #[tokio::test]
    async fn test_capture_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the directory should be
        let blocker = dir.path().join("captures");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let handlers = handlers(state_with_frame(), MockAnswerer::new(), &blocker);

        let err = handlers.capture_image().await.unwrap_err();
        assert!(matches!(err, QueryError::Persist(PersistError::Io { .. })));
    }

    #[test]
    fn test_capture_filename_format() {
        let name = capture_filename();
        // capture_YYYYmmdd_HHMMSS_mmm.jpg
        assert_eq!(name.len(), "capture_20240101_120000_000.jpg".len());
    }
}
