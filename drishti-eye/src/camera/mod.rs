//! Camera capture: device backends and the frame source
//!
//! A [`FrameSource`] owns at most one capture session. The session's
//! acquisition thread is the only code that touches the device; everything else
//! sees frames through the single-slot latest cache or the replay buffer.

pub mod buffer;
pub mod synthetic;

#[cfg(feature = "opencv")]
pub mod opencv;

use crate::config::CaptureConfig;
use crate::error::CameraError;
use crate::frame::Frame;
use buffer::DropOldestBuffer;
use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub use synthetic::SyntheticBackend;

#[cfg(feature = "opencv")]
pub use self::opencv::OpenCvBackend;

/// Frames kept for consumers that want every frame in order
pub const REPLAY_CAPACITY: usize = 5;

/// How long `stop` waits for the acquisition thread
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What the device actually agreed to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceProfile {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// An open capture device. Owned by exactly one acquisition thread.
pub trait CaptureDevice: Send {
    /// Block until the next frame is available
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    fn profile(&self) -> DeviceProfile;

    /// Release the underlying handle; called once when the session ends
    fn release(&mut self) {}
}

/// Opens capture devices
pub trait CaptureBackend: Send + Sync {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>, CameraError>;
}

/// Read side of a frame source, as seen by the broadcaster
pub trait FrameFeed: Send + Sync {
    fn is_available(&self) -> bool;

    /// Copy of the most recent frame, never blocking on capture
    fn latest_frame(&self) -> Option<Frame>;
}

/// Camera state reported to clients
#[derive(Debug, Clone, PartialEq)]
pub enum CameraInfo {
    Unavailable,
    Available {
        width: u32,
        height: u32,
        fps: f64,
        device_index: u32,
    },
}

impl CameraInfo {
    pub fn is_available(&self) -> bool {
        matches!(self, CameraInfo::Available { .. })
    }
}

// {"available": false} or {"available": true, "width", "height", "fps", "camera_index"}
impl Serialize for CameraInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CameraInfo::Unavailable => {
                let mut state = serializer.serialize_struct("CameraInfo", 1)?;
                state.serialize_field("available", &false)?;
                state.end()
            }
            CameraInfo::Available { width, height, fps, device_index } => {
                let mut state = serializer.serialize_struct("CameraInfo", 5)?;
                state.serialize_field("available", &true)?;
                state.serialize_field("width", width)?;
                state.serialize_field("height", height)?;
                state.serialize_field("fps", fps)?;
                state.serialize_field("camera_index", device_index)?;
                state.end()
            }
        }
    }
}

/// Frame state shared between one acquisition thread and its readers
struct FrameSlots {
    latest: Mutex<Option<Frame>>,
    replay: Mutex<DropOldestBuffer<Frame>>,
    alive: AtomicBool,
    cancel: AtomicBool,
    captured: AtomicU64,
    dropped: AtomicU64,
}

impl FrameSlots {
    fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            replay: Mutex::new(DropOldestBuffer::new(REPLAY_CAPACITY)),
            alive: AtomicBool::new(true),
            cancel: AtomicBool::new(false),
            captured: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn store(&self, frame: Frame) {
        *self.latest.lock() = Some(frame.clone());
        let evicted = self.replay.lock().push(frame);
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.captured.fetch_add(1, Ordering::Relaxed);
    }
}

struct CaptureSession {
    device_index: u32,
    profile: DeviceProfile,
    slots: Arc<FrameSlots>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureSession {
    fn is_alive(&self) -> bool {
        self.slots.alive.load(Ordering::Acquire)
    }

    fn shutdown(mut self) {
        self.slots.cancel.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            join_with_timeout(handle, JOIN_TIMEOUT);
        }
    }
}

/// Live camera frames with a latest-frame cache and a small replay buffer
pub struct FrameSource {
    backend: Arc<dyn CaptureBackend>,
    session: Mutex<Option<CaptureSession>>,
}

impl FrameSource {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            session: Mutex::new(None),
        }
    }

    /// Open the device and spawn the acquisition thread. Returns once the
    /// thread is running.
    pub fn start(&self, config: &CaptureConfig) -> Result<(), CameraError> {
        config.validate().map_err(CameraError::InvalidConfig)?;

        let mut guard = self.session.lock();
        if guard.as_ref().map_or(false, |s| s.is_alive()) {
            return Err(CameraError::AlreadyRunning);
        }
        // A session whose loop died on a read failure is reaped here
        if let Some(dead) = guard.take() {
            debug!("Reaping ended capture session on camera {}", dead.device_index);
            dead.shutdown();
        }

        let device = self.backend.open(config)?;
        let profile = device.profile();
        let slots = Arc::new(FrameSlots::new());
        let interval = config.frame_interval();

        let loop_slots = slots.clone();
        let handle = thread::Builder::new()
            .name(format!("camera-{}", config.device_index))
            .spawn(move || acquisition_loop(device, loop_slots, interval))
            .map_err(|e| CameraError::OpenFailed {
                index: config.device_index,
                reason: format!("failed to spawn capture thread: {}", e),
            })?;

        info!(
            "Camera {} started at {}x{} @ {:.1}fps",
            config.device_index, profile.width, profile.height, profile.fps
        );

        *guard = Some(CaptureSession {
            device_index: config.device_index,
            profile,
            slots,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Stop the acquisition thread and release the device. No-op when idle.
    pub fn stop(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            let index = session.device_index;
            session.shutdown();
            info!("Camera {} stopped", index);
        }
    }

    /// Device open and acquisition thread running
    pub fn is_available(&self) -> bool {
        self.session.lock().as_ref().map_or(false, |s| s.is_alive())
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        let guard = self.session.lock();
        let session = guard.as_ref()?;
        let frame = session.slots.latest.lock().clone();
        frame
    }

    /// Oldest frame not yet taken from the replay buffer
    pub fn next_buffered(&self) -> Option<Frame> {
        let guard = self.session.lock();
        let session = guard.as_ref()?;
        let frame = session.slots.replay.lock().pop();
        frame
    }

    pub fn buffered_len(&self) -> usize {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |s| s.slots.replay.lock().len())
    }

    /// Frames read in the current session
    pub fn frames_captured(&self) -> u64 {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |s| s.slots.captured.load(Ordering::Relaxed))
    }

    /// Frames evicted from the replay buffer in the current session
    pub fn frames_dropped(&self) -> u64 {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |s| s.slots.dropped.load(Ordering::Relaxed))
    }

    pub fn info(&self) -> CameraInfo {
        match self.session.lock().as_ref() {
            Some(session) if session.is_alive() => CameraInfo::Available {
                width: session.profile.width,
                height: session.profile.height,
                fps: session.profile.fps,
                device_index: session.device_index,
            },
            _ => CameraInfo::Unavailable,
        }
    }
}

impl FrameFeed for FrameSource {
    fn is_available(&self) -> bool {
        FrameSource::is_available(self)
    }

    fn latest_frame(&self) -> Option<Frame> {
        FrameSource::latest_frame(self)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn acquisition_loop(mut device: Box<dyn CaptureDevice>, slots: Arc<FrameSlots>, interval: Duration) {
    debug!("Camera acquisition loop started");
    let mut frame_count: u64 = 0;

    while !slots.cancel.load(Ordering::Acquire) {
        let started = Instant::now();

        match device.read_frame() {
            Ok(frame) => {
                frame_count += 1;
                slots.store(frame.with_sequence(frame_count));
                if frame_count % 100 == 0 {
                    info!("Captured {} frames", frame_count);
                }
            }
            Err(e) => {
                // Not retried: the session is over until the next start
                error!("Camera read error, ending capture session: {}", e);
                break;
            }
        }

        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    device.release();
    slots.alive.store(false, Ordering::Release);
    info!("Camera acquisition loop stopped after {} frames", frame_count);
}

fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("Capture thread did not exit within {:?}, detaching it", timeout);
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        error!("Capture thread panicked");
    }
}
