//! Vision-language answering capability

use crate::annotation::{encode_jpeg, resize_to_fit};
use crate::detection::DetectionResult;
use crate::error::AnswerError;
use crate::frame::Frame;
use async_trait::async_trait;
use drishti_llm::VisionChatClient;
use serde::Serialize;
use std::fmt::Write as _;
use tracing::debug;

pub const SCENE_QUESTION: &str =
    "Describe this scene in detail, including the environment, the objects and any human activity.";
pub const SAFETY_QUESTION: &str =
    "Does this scene contain any safety hazards? If it does, explain them in detail.";

const DANGER_KEYWORDS: [&str; 6] = ["danger", "hazard", "unsafe", "risk", "caution", "careful"];
const SEVERE_KEYWORDS: [&str; 3] = ["severe", "urgent", "critical"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyReport {
    pub has_danger: bool,
    pub level: SafetyLevel,
    pub description: String,
}

impl SafetyReport {
    /// Keyword verdict over a free-text safety answer
    pub fn classify(description: String) -> Self {
        let lower = description.to_lowercase();
        let has_danger = DANGER_KEYWORDS.iter().any(|k| lower.contains(k));
        let level = if SEVERE_KEYWORDS.iter().any(|k| lower.contains(k)) {
            SafetyLevel::High
        } else if has_danger {
            SafetyLevel::Medium
        } else {
            SafetyLevel::Low
        };
        Self { has_danger, level, description }
    }
}

/// Answers questions about a frame using its detections as extra context
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, frame: &Frame, question: &str, detections: &DetectionResult) -> Result<String, AnswerError>;

    async fn describe_scene(&self, frame: &Frame, detections: &DetectionResult) -> Result<String, AnswerError>;

    async fn check_safety(&self, frame: &Frame, detections: &DetectionResult) -> Result<SafetyReport, AnswerError>;
}

/// Prompt sent alongside the image
pub fn build_prompt(question: &str, detections: &DetectionResult) -> String {
    let mut prompt = format!("User question: {}\n\n", question);
    if !detections.is_empty() {
        prompt.push_str("Object detection results:\n");
        for (i, object) in detections.objects.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {} (confidence: {:.2})", i + 1, object.label, object.confidence);
        }
        let _ = write!(prompt, "\nDetected {} objects in total.\n\n", detections.object_count());
    }
    prompt.push_str("Answer the user's question using both the image and the detection results.");
    prompt
}

/// [`Answerer`] backed by a multimodal chat endpoint
pub struct VisionLanguageAnswerer {
    client: VisionChatClient,
    jpeg_quality: u8,
    max_size: (u32, u32),
}

impl VisionLanguageAnswerer {
    pub fn new(client: VisionChatClient) -> Self {
        Self {
            client,
            jpeg_quality: 85,
            max_size: (1280, 720),
        }
    }

    /// Encoding used for the image sent upstream
    pub fn with_image_settings(mut self, jpeg_quality: u8, max_width: u32, max_height: u32) -> Self {
        self.jpeg_quality = jpeg_quality;
        self.max_size = (max_width, max_height);
        self
    }

    async fn ask(&self, frame: &Frame, question: &str, detections: &DetectionResult) -> Result<String, AnswerError> {
        let image = resize_to_fit(frame.to_rgb_image(), self.max_size.0, self.max_size.1);
        let encoded = encode_jpeg(&image, self.jpeg_quality)?;
        let prompt = build_prompt(question, detections);
        debug!("Asking about {}x{} frame with {} detections", encoded.width, encoded.height, detections.object_count());
        Ok(self.client.ask(&prompt, &encoded.data_uri()).await?)
    }
}

#[async_trait]
impl Answerer for VisionLanguageAnswerer {
    async fn answer(&self, frame: &Frame, question: &str, detections: &DetectionResult) -> Result<String, AnswerError> {
        self.ask(frame, question, detections).await
    }

    async fn describe_scene(&self, frame: &Frame, detections: &DetectionResult) -> Result<String, AnswerError> {
        self.ask(frame, SCENE_QUESTION, detections).await
    }

    async fn check_safety(&self, frame: &Frame, detections: &DetectionResult) -> Result<SafetyReport, AnswerError> {
        let description = self.ask(frame, SAFETY_QUESTION, detections).await?;
        Ok(SafetyReport::classify(description))
    }
}

/// Detection-only answers for when no chat service is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineAnswerer;

const OFFLINE_NOTE: &str = "No vision-language service is configured, so this is based on object detection only.";

#[async_trait]
impl Answerer for OfflineAnswerer {
    async fn answer(&self, _frame: &Frame, question: &str, detections: &DetectionResult) -> Result<String, AnswerError> {
        Ok(format!("You asked: \"{}\". {}. {}", question, detections.summary(), OFFLINE_NOTE))
    }

    async fn describe_scene(&self, frame: &Frame, detections: &DetectionResult) -> Result<String, AnswerError> {
        Ok(format!(
            "A {}x{} camera view. {}. {}",
            frame.width(),
            frame.height(),
            detections.summary(),
            OFFLINE_NOTE
        ))
    }

    async fn check_safety(&self, _frame: &Frame, detections: &DetectionResult) -> Result<SafetyReport, AnswerError> {
        Ok(SafetyReport {
            has_danger: false,
            level: SafetyLevel::Low,
            description: format!("{}. {}", detections.summary(), OFFLINE_NOTE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, DetectedObject};
    use drishti_llm::{ChatConfig, LLMError};
    use image::RgbImage;

    fn detections() -> DetectionResult {
        DetectionResult::new(vec![
            DetectedObject::new("person", 0.91, BoundingBox::new(0, 0, 10, 10)),
            DetectedObject::new("cup", 0.5, BoundingBox::new(2, 2, 4, 4)),
        ])
    }

    #[test]
    fn test_prompt_lists_detections() {
        let prompt = build_prompt("What is on the table?", &detections());
        assert!(prompt.starts_with("User question: What is on the table?\n\n"));
        assert!(prompt.contains("1. person (confidence: 0.91)\n2. cup (confidence: 0.50)\n"));
        assert!(prompt.contains("Detected 2 objects in total."));
    }

    #[test]
    fn test_prompt_without_detections() {
        let prompt = build_prompt("Hello?", &DetectionResult::empty());
        assert!(!prompt.contains("Object detection results"));
        assert!(prompt.ends_with("detection results."));
    }

    #[test]
    fn test_safety_classification() {
        let low = SafetyReport::classify("Everything looks fine.".to_string());
        assert_eq!((low.has_danger, low.level), (false, SafetyLevel::Low));

        let medium = SafetyReport::classify("Be careful with the knife.".to_string());
        assert_eq!((medium.has_danger, medium.level), (true, SafetyLevel::Medium));

        let high = SafetyReport::classify("CRITICAL: a serious Hazard near the stove.".to_string());
        assert_eq!((high.has_danger, high.level), (true, SafetyLevel::High));
    }

    #[test]
    fn test_safety_report_json() {
        let json = serde_json::to_value(SafetyReport::classify("risk".to_string())).unwrap();
        assert_eq!(json["level"], "medium");
        assert_eq!(json["has_danger"], true);
    }

    #[tokio::test]
    async fn test_offline_answerer_uses_detections() {
        let frame = Frame::from_rgb_image(RgbImage::new(64, 48));
        let answer = OfflineAnswerer.answer(&frame, "Who is there?", &detections()).await.unwrap();
        assert!(answer.contains("Detected: 1 person, 1 cup"));

        let report = OfflineAnswerer.check_safety(&frame, &detections()).await.unwrap();
        assert_eq!(report.level, SafetyLevel::Low);
    }

    #[tokio::test]
    async fn test_vision_answerer_without_key() {
        let client = VisionChatClient::new(ChatConfig::default()).unwrap();
        let answerer = VisionLanguageAnswerer::new(client);
        let frame = Frame::from_rgb_image(RgbImage::new(64, 48));
        let err = answerer.answer(&frame, "?", &DetectionResult::empty()).await.unwrap_err();
        assert!(matches!(err, AnswerError::Llm(LLMError::MissingApiKey(_))));
    }
}
