//! Synthetic camera for demo mode and tests
//!
//! Renders a small moving scene so the whole pipeline runs without hardware.
//! The same object placement drives [`crate::detection::DemoDetector`], so
//! boxes line up with what is drawn.

use super::{CaptureBackend, CaptureDevice, DeviceProfile};
use crate::config::CaptureConfig;
use crate::detection::BoundingBox;
use crate::error::CameraError;
use crate::frame::{ChannelOrder, Frame};
use chrono::{DateTime, Local};
use tracing::info;

/// Scene layout is designed on this canvas and scaled to the frame
const CANVAS_WIDTH: f64 = 640.0;
const CANVAS_HEIGHT: f64 = 480.0;

/// Shape of a scene object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Ellipse,
    Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub label: &'static str,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub shape: Shape,
    /// BGR
    pub color: [u8; 3],
}

/// Scene clock in seconds for a capture instant
pub fn scene_time(at: DateTime<Local>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Objects of the demo scene at time `t`, in frame coordinates
pub fn scene_objects(t: f64, width: u32, height: u32) -> Vec<SceneObject> {
    let sx = width as f64 / CANVAS_WIDTH;
    let sy = height as f64 / CANVAS_HEIGHT;
    let place = |x1: f64, y1: f64, x2: f64, y2: f64| {
        BoundingBox::from_f32(
            (x1 * sx) as f32,
            (y1 * sy) as f32,
            (x2 * sx) as f32,
            (y2 * sy) as f32,
            width,
            height,
        )
    };

    // Person walks left and right across the middle
    let px = 320.0 + 200.0 * (t * 0.6).sin();
    let person = place(px - 45.0, 150.0, px + 45.0, 370.0);

    // Parked car, bottom left
    let car = place(40.0, 330.0, 230.0, 430.0);

    // Bicycle bobs up and down on the right
    let by = 150.0 + 40.0 * (t * 1.3).sin();
    let bicycle = place(440.0, by - 25.0, 600.0, by + 25.0);

    vec![
        SceneObject { label: "person", confidence: 0.95, bbox: person, shape: Shape::Ellipse, color: [60, 170, 240] },
        SceneObject { label: "car", confidence: 0.88, bbox: car, shape: Shape::Block, color: [200, 90, 40] },
        SceneObject { label: "bicycle", confidence: 0.82, bbox: bicycle, shape: Shape::Block, color: [80, 200, 90] },
    ]
}

/// Render the scene at time `t` as a BGR buffer
pub fn render_scene(t: f64, width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![0u8; w * h * 3];

    for y in 0..h {
        let shade = (40 + y * 60 / h.max(1)) as u8;
        let row = &mut data[y * w * 3..(y + 1) * w * 3];
        for px in row.chunks_exact_mut(3) {
            px.copy_from_slice(&[shade, shade, shade]);
        }
    }

    for object in scene_objects(t, width, height) {
        let b = object.bbox;
        let (cx, cy) = ((b.x1 + b.x2) as f64 / 2.0, (b.y1 + b.y2) as f64 / 2.0);
        let (rx, ry) = ((b.width() as f64 / 2.0).max(1.0), (b.height() as f64 / 2.0).max(1.0));
        for y in b.y1..b.y2.min(height) {
            for x in b.x1..b.x2.min(width) {
                let inside = match object.shape {
                    Shape::Block => true,
                    Shape::Ellipse => {
                        let dx = (x as f64 + 0.5 - cx) / rx;
                        let dy = (y as f64 + 0.5 - cy) / ry;
                        dx * dx + dy * dy <= 1.0
                    }
                };
                if inside {
                    let i = (y as usize * w + x as usize) * 3;
                    data[i..i + 3].copy_from_slice(&object.color);
                }
            }
        }
    }

    data
}

/// Opens [`SyntheticDevice`]s at whatever resolution is requested
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticBackend;

impl CaptureBackend for SyntheticBackend {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let (width, height) = config.resolution;
        info!("Opening synthetic camera {} at {}x{}", config.device_index, width, height);
        Ok(Box::new(SyntheticDevice {
            profile: DeviceProfile { width, height, fps: config.device_fps as f64 },
        }))
    }
}

pub struct SyntheticDevice {
    profile: DeviceProfile,
}

impl CaptureDevice for SyntheticDevice {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let now = Local::now();
        let DeviceProfile { width, height, .. } = self.profile;
        let data = render_scene(scene_time(now), width, height);
        Frame::from_raw(width, height, ChannelOrder::Bgr, data)
            .map(|frame| frame.with_captured_at(now))
            .ok_or_else(|| CameraError::ReadFailed(format!("bad synthetic frame size {}x{}", width, height)))
    }

    fn profile(&self) -> DeviceProfile {
        self.profile
    }
}
