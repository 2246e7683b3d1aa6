//! Detection results and the detector capability

use crate::camera::synthetic;
use crate::config::DetectionConfig;
use crate::error::DetectionError;
use crate::frame::Frame;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Axis-aligned box in pixel coordinates, `x1 <= x2` and `y1 <= y2`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    /// Corners may be given in any order
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Box from detector float output, rounded towards the box interior and
    /// clipped to the frame
    pub fn from_f32(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Self {
        let clip = |v: f32, max: u32| -> u32 {
            if v.is_finite() {
                v.max(0.0).min(max as f32) as u32
            } else {
                0
            }
        };
        Self::new(clip(x1, width), clip(y1, height), clip(x2, width), clip(y2, height))
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (u32, u32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    /// Clip to a `width` x `height` frame
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        Self::new(
            self.x1.min(width),
            self.y1.min(height),
            self.x2.min(width),
            self.y2.min(height),
        )
    }

    /// Box mapped into a frame scaled by `scale`
    pub fn scaled(&self, scale: f64) -> Self {
        let s = |v: u32| (v as f64 * scale).round() as u32;
        Self::new(s(self.x1), s(self.y1), s(self.x2), s(self.y2))
    }
}

/// One object found in a frame
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl DetectedObject {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }

    pub fn center(&self) -> (u32, u32) {
        self.bbox.center()
    }
}

// Wire shape: {"class", "confidence", "bbox": [x1, y1, x2, y2], "center": [x, y]}
impl Serialize for DetectedObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (cx, cy) = self.center();
        let mut state = serializer.serialize_struct("DetectedObject", 4)?;
        state.serialize_field("class", &self.label)?;
        state.serialize_field("confidence", &self.confidence)?;
        state.serialize_field("bbox", &[self.bbox.x1, self.bbox.y1, self.bbox.x2, self.bbox.y2])?;
        state.serialize_field("center", &[cx, cy])?;
        state.end()
    }
}

/// Objects a detector found in one frame, in detector order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub objects: Vec<DetectedObject>,
}

impl DetectionResult {
    pub fn new(objects: Vec<DetectedObject>) -> Self {
        Self { objects }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Enforce the frame-bounds invariant on every box
    pub fn clamped(mut self, width: u32, height: u32) -> Self {
        for object in &mut self.objects {
            object.bbox = object.bbox.clamped(width, height);
        }
        self
    }

    /// Drop objects below `threshold`
    pub fn filtered(mut self, threshold: f32) -> Self {
        self.objects.retain(|o| o.confidence >= threshold);
        self
    }

    /// Human readable tally in first-seen label order, e.g.
    /// `"Detected: 2 person, 1 cup"`
    pub fn summary(&self) -> String {
        if self.objects.is_empty() {
            return "No objects detected".to_string();
        }
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for object in &self.objects {
            match counts.iter().position(|(label, _)| *label == object.label) {
                Some(i) => counts[i].1 += 1,
                None => counts.push((object.label.as_str(), 1)),
            }
        }
        let parts: Vec<String> = counts
            .iter()
            .map(|(label, count)| format!("{} {}", count, label))
            .collect();
        format!("Detected: {}", parts.join(", "))
    }
}

impl Serialize for DetectionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DetectionResult", 2)?;
        state.serialize_field("object_count", &self.object_count())?;
        state.serialize_field("objects", &self.objects)?;
        state.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionThresholds {
    pub confidence: f32,
    pub iou: f32,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

impl From<&DetectionConfig> for DetectionThresholds {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            confidence: config.confidence_threshold,
            iou: config.iou_threshold,
        }
    }
}

/// Object detection capability.
///
/// Called from a blocking worker thread, never from the async runtime.
/// A detector that is not ready is not an error: the caller falls back to an
/// empty result.
#[cfg_attr(test, mockall::automock)]
pub trait Detector: Send + Sync {
    fn is_ready(&self) -> bool;

    fn detect(&self, frame: &Frame, thresholds: DetectionThresholds) -> Result<DetectionResult, DetectionError>;
}

/// Reports the objects of the synthetic demo scene at the frame's capture time
pub struct DemoDetector;

impl Detector for DemoDetector {
    fn is_ready(&self) -> bool {
        true
    }

    fn detect(&self, frame: &Frame, thresholds: DetectionThresholds) -> Result<DetectionResult, DetectionError> {
        let t = synthetic::scene_time(frame.captured_at());
        let objects = synthetic::scene_objects(t, frame.width(), frame.height())
            .into_iter()
            .map(|o| DetectedObject::new(o.label, o.confidence, o.bbox))
            .collect();
        Ok(DetectionResult::new(objects)
            .filtered(thresholds.confidence)
            .clamped(frame.width(), frame.height()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn object(label: &str, confidence: f32) -> DetectedObject {
        DetectedObject::new(label, confidence, BoundingBox::new(10, 10, 50, 30))
    }

    #[test]
    fn test_bbox_normalizes_corners() {
        let bbox = BoundingBox::new(50, 40, 10, 20);
        assert_eq!(bbox, BoundingBox { x1: 10, y1: 20, x2: 50, y2: 40 });
        assert_eq!(bbox.center(), (30, 30));
        assert_eq!(bbox.width(), 40);
    }

    #[test]
    fn test_bbox_from_f32_clips() {
        let bbox = BoundingBox::from_f32(-5.0, 10.7, 700.0, f32::NAN, 640, 480);
        assert_eq!(bbox, BoundingBox::new(0, 0, 640, 10));
    }

    #[test]
    fn test_clamped_keeps_invariant() {
        let result = DetectionResult::new(vec![DetectedObject::new(
            "car",
            0.9,
            BoundingBox::new(600, 400, 900, 700),
        )])
        .clamped(640, 480);
        let bbox = result.objects[0].bbox;
        assert!(bbox.x1 <= bbox.x2 && bbox.x2 <= 640);
        assert!(bbox.y1 <= bbox.y2 && bbox.y2 <= 480);
    }

    #[test]
    fn test_filtered_by_threshold() {
        let result = DetectionResult::new(vec![object("a", 0.4), object("b", 0.5), object("c", 0.9)]).filtered(0.5);
        let labels: Vec<_> = result.objects.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "c"]);
    }

    #[test]
    fn test_summary() {
        assert_eq!(DetectionResult::empty().summary(), "No objects detected");
        let result = DetectionResult::new(vec![object("person", 0.9), object("cup", 0.8), object("person", 0.7)]);
        assert_eq!(result.summary(), "Detected: 2 person, 1 cup");
    }

    #[test]
    fn test_wire_format() {
        let result = DetectionResult::new(vec![object("dog", 0.75)]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["object_count"], 1);
        assert_eq!(json["objects"][0]["class"], "dog");
        assert_eq!(json["objects"][0]["bbox"], serde_json::json!([10, 10, 50, 30]));
        assert_eq!(json["objects"][0]["center"], serde_json::json!([30, 20]));
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(DetectedObject::new("x", 1.7, BoundingBox::new(0, 0, 1, 1)).confidence, 1.0);
    }

    #[test]
    fn test_demo_detector_stays_in_frame() {
        let frame = Frame::from_rgb_image(RgbImage::new(320, 240));
        let result = DemoDetector.detect(&frame, DetectionThresholds::default()).unwrap();
        assert_eq!(result.object_count(), 3);
        for object in &result.objects {
            assert!(object.bbox.x2 <= 320 && object.bbox.y2 <= 240);
        }
    }

    #[test]
    fn test_mock_detector() {
        let mut detector = MockDetector::new();
        detector.expect_is_ready().return_const(false);
        detector
            .expect_detect()
            .returning(|_, _| Err(DetectionError::NotReady));
        let frame = Frame::from_rgb_image(RgbImage::new(2, 2));
        assert!(!detector.is_ready());
        assert!(detector.detect(&frame, DetectionThresholds::default()).is_err());
    }
}
