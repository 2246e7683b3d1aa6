//! Shared test doubles

#![allow(dead_code)]

use drishti_eye::camera::{CaptureBackend, CaptureDevice, DeviceProfile};
use drishti_eye::config::CaptureConfig;
use drishti_eye::detection::{BoundingBox, DetectedObject, DetectionResult, DetectionThresholds, Detector};
use drishti_eye::error::{CameraError, DetectionError};
use drishti_eye::frame::{ChannelOrder, Frame};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WIDTH: u32 = 32;
pub const HEIGHT: u32 = 24;

/// Frame `n` is filled with the byte `n % 251`, so a torn frame shows up as
/// mixed bytes
pub fn scripted_frame(n: u64) -> Frame {
    let fill = (n % 251) as u8;
    Frame::from_raw(WIDTH, HEIGHT, ChannelOrder::Bgr, vec![fill; (WIDTH * HEIGHT * 3) as usize])
        .expect("valid frame size")
}

pub fn is_uniform(frame: &Frame) -> bool {
    let first = frame.data()[0];
    frame.data().iter().all(|b| *b == first)
}

/// Backend whose devices emit [`scripted_frame`]s and optionally fail after a
/// fixed number of reads
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    pub fail_after: Option<u64>,
    pub opens: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn endless() -> Self {
        Self::default()
    }

    pub fn failing_after(reads: u64) -> Self {
        Self { fail_after: Some(reads), ..Self::default() }
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open(&self, _config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDevice {
            reads: 0,
            fail_after: self.fail_after,
            releases: self.releases.clone(),
        }))
    }
}

struct ScriptedDevice {
    reads: u64,
    fail_after: Option<u64>,
    releases: Arc<AtomicUsize>,
}

impl CaptureDevice for ScriptedDevice {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.fail_after.map_or(false, |n| self.reads >= n) {
            return Err(CameraError::ReadFailed("scripted failure".to_string()));
        }
        self.reads += 1;
        Ok(scripted_frame(self.reads))
    }

    fn profile(&self) -> DeviceProfile {
        DeviceProfile { width: WIDTH, height: HEIGHT, fps: 120.0 }
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn fast_capture() -> CaptureConfig {
    CaptureConfig {
        resolution: (WIDTH, HEIGHT),
        device_fps: 120,
        broadcast_fps: 60,
        ..CaptureConfig::default()
    }
}

pub fn one_object() -> DetectionResult {
    DetectionResult::new(vec![DetectedObject::new("cup", 0.9, BoundingBox::new(2, 2, 20, 20))])
}

/// Takes `delay` per call and flags when a call is in progress
pub struct SlowDetector {
    pub delay: Duration,
    pub in_progress: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
}

impl SlowDetector {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_progress: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Detector for SlowDetector {
    fn is_ready(&self) -> bool {
        true
    }

    fn detect(&self, _frame: &Frame, _thresholds: DetectionThresholds) -> Result<DetectionResult, DetectionError> {
        self.in_progress.store(true, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.in_progress.store(false, Ordering::SeqCst);
        Ok(one_object())
    }
}

/// Fails every odd-numbered call
#[derive(Default)]
pub struct FlakyDetector {
    pub calls: AtomicUsize,
}

impl Detector for FlakyDetector {
    fn is_ready(&self) -> bool {
        true
    }

    fn detect(&self, _frame: &Frame, _thresholds: DetectionThresholds) -> Result<DetectionResult, DetectionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % 2 == 1 {
            Err(DetectionError::Inference(format!("call {} failed", call)))
        } else {
            Ok(one_object())
        }
    }
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

pub async fn wait_until_async(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
