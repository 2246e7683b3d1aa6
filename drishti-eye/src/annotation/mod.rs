//! Frame annotation, resizing and transport encoding
//!
//! Everything here is a pure function of its inputs. A pipeline call draws
//! boxes and labels, overlays the capture timestamp, downsizes to the transport
//! bounds and encodes, in that order; each step can be switched off through
//! [`AnnotationOptions`].

pub mod font;

use crate::config::{CaptureConfig, DetectionConfig};
use crate::detection::DetectionResult;
use crate::error::EncodeError;
use crate::frame::Frame;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, ColorType, Rgb, RgbImage};

/// Overlay text is drawn at twice the glyph size
const TEXT_SCALE: u32 = 2;
const TEXT_PADDING: u32 = 4;
const BOX_THICKNESS: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationOptions {
    pub draw_boxes: bool,
    pub draw_timestamp: bool,
    /// Bounds to downsize into; `None` keeps the frame's own size
    pub max_size: Option<(u32, u32)>,
    pub jpeg_quality: u8,
}

impl Default for AnnotationOptions {
    fn default() -> Self {
        Self {
            draw_boxes: true,
            draw_timestamp: true,
            max_size: Some((1280, 720)),
            jpeg_quality: 85,
        }
    }
}

impl AnnotationOptions {
    /// Options for the broadcast stream
    pub fn for_stream(capture: &CaptureConfig, detection: &DetectionConfig) -> Self {
        Self {
            draw_boxes: detection.draw_boxes,
            draw_timestamp: detection.draw_timestamp,
            max_size: Some((capture.max_width, capture.max_height)),
            jpeg_quality: capture.jpeg_quality,
        }
    }

    /// Same drawing, no resize
    pub fn full_resolution(mut self) -> Self {
        self.max_size = None;
        self
    }

    pub fn without_overlays(mut self) -> Self {
        self.draw_boxes = false;
        self.draw_timestamp = false;
        self
    }
}

/// An encoded image ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub mime: &'static str,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedFrame {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationPipeline {
    options: AnnotationOptions,
}

impl AnnotationPipeline {
    pub fn new(options: AnnotationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AnnotationOptions {
        &self.options
    }

    /// Draw overlays and downsize. The input frame is left untouched.
    pub fn annotate(&self, frame: &Frame, detections: &DetectionResult) -> Frame {
        let image = self.render(frame, detections);
        Frame::from_rgb_image(image)
            .with_sequence(frame.sequence())
            .with_captured_at(frame.captured_at())
    }

    /// Like [`annotate`](Self::annotate) but stops at the RGB image
    pub fn render(&self, frame: &Frame, detections: &DetectionResult) -> RgbImage {
        let mut image = frame.to_rgb_image();
        if self.options.draw_boxes {
            draw_detections(&mut image, detections);
        }
        if self.options.draw_timestamp {
            overlay_timestamp(&mut image, &frame.timestamp_label());
        }
        match self.options.max_size {
            Some((max_width, max_height)) => resize_to_fit(image, max_width, max_height),
            None => image,
        }
    }

    pub fn encode(&self, frame: &Frame) -> Result<EncodedFrame, EncodeError> {
        encode_jpeg(&frame.to_rgb_image(), self.options.jpeg_quality)
    }

    /// Annotate then encode
    pub fn process(&self, frame: &Frame, detections: &DetectionResult) -> Result<EncodedFrame, EncodeError> {
        encode_jpeg(&self.render(frame, detections), self.options.jpeg_quality)
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<EncodedFrame, EncodeError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || width > u16::MAX as u32 || height > u16::MAX as u32 {
        return Err(EncodeError::InvalidFrame { width, height });
    }
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100)).encode(
        image.as_raw(),
        width,
        height,
        ColorType::Rgb8,
    )?;
    Ok(EncodedFrame {
        mime: "image/jpeg",
        bytes,
        width,
        height,
    })
}

/// Size that fits `width x height` inside the bounds with the aspect ratio
/// kept, never larger than the input
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let (w, h) = (width as u64, height as u64);
    let (mw, mh) = (max_width.max(1) as u64, max_height.max(1) as u64);
    // Width is the tighter bound when mw/w <= mh/h
    let (new_w, new_h) = if mw * h <= mh * w {
        (mw, h * mw / w)
    } else {
        (w * mh / h, mh)
    };
    (new_w.max(1) as u32, new_h.max(1) as u32)
}

pub fn resize_to_fit(image: RgbImage, max_width: u32, max_height: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let (new_width, new_height) = fit_within(width, height, max_width, max_height);
    if (new_width, new_height) == (width, height) {
        return image;
    }
    image::imageops::resize(&image, new_width, new_height, FilterType::Triangle)
}

/// Stable colour for a label (FNV-1a over its bytes)
pub fn label_color(label: &str) -> Rgb<u8> {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in label.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    let channel = |shift: u32| 64 + ((hash >> shift) & 0xff) as u8 % 192;
    Rgb([channel(0), channel(8), channel(16)])
}

/// Boxes, filled label backgrounds and `label: confidence` text
pub fn draw_detections(image: &mut RgbImage, detections: &DetectionResult) {
    let (width, height) = image.dimensions();
    for object in &detections.objects {
        let bbox = object.bbox.clamped(width, height);
        let color = label_color(&object.label);
        stroke_rect(image, bbox.x1, bbox.y1, bbox.x2, bbox.y2, BOX_THICKNESS, color);

        let text = format!("{}: {:.2}", object.label, object.confidence);
        let (text_w, text_h) = font::text_size(&text, TEXT_SCALE);
        let label_h = text_h + 2 * TEXT_PADDING;
        // Above the box, or just inside it when there is no room
        let top = if bbox.y1 >= label_h { bbox.y1 - label_h } else { bbox.y1 };
        fill_rect(image, bbox.x1, top, bbox.x1 + text_w + 2 * TEXT_PADDING, top + label_h, color);
        font::draw_text(
            image,
            (bbox.x1 + TEXT_PADDING) as i64,
            (top + TEXT_PADDING) as i64,
            &text,
            TEXT_SCALE,
            Rgb([0, 0, 0]),
        );
    }
}

/// White text on an opaque black box in the lower-right corner
pub fn overlay_timestamp(image: &mut RgbImage, text: &str) {
    let (width, height) = image.dimensions();
    let (text_w, text_h) = font::text_size(text, TEXT_SCALE);
    let box_w = text_w + 2 * TEXT_PADDING;
    let box_h = text_h + 2 * TEXT_PADDING;
    let left = width.saturating_sub(box_w + TEXT_PADDING);
    let top = height.saturating_sub(box_h + TEXT_PADDING);
    fill_rect(image, left, top, left + box_w, top + box_h, Rgb([0, 0, 0]));
    font::draw_text(
        image,
        (left + TEXT_PADDING) as i64,
        (top + TEXT_PADDING) as i64,
        text,
        TEXT_SCALE,
        Rgb([255, 255, 255]),
    );
}

/// Fill `[x1, x2) x [y1, y2)`, clipped
fn fill_rect(image: &mut RgbImage, x1: u32, y1: u32, x2: u32, y2: u32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    for y in y1.min(height)..y2.min(height) {
        for x in x1.min(width)..x2.min(width) {
            image.put_pixel(x, y, color);
        }
    }
}

/// Outline drawn inward from the box edges
fn stroke_rect(image: &mut RgbImage, x1: u32, y1: u32, x2: u32, y2: u32, thickness: u32, color: Rgb<u8>) {
    let t = thickness.max(1);
    fill_rect(image, x1, y1, x2, (y1 + t).min(y2), color);
    fill_rect(image, x1, y2.saturating_sub(t).max(y1), x2, y2, color);
    fill_rect(image, x1, y1, (x1 + t).min(x2), y2, color);
    fill_rect(image, x2.saturating_sub(t).max(x1), y1, x2, y2, color);
}
