//! USB webcam capture through OpenCV

use super::{CaptureBackend, CaptureDevice, DeviceProfile};
use crate::config::CaptureConfig;
use crate::error::CameraError;
use crate::frame::{ChannelOrder, Frame};
use opencv::{
    core::{Mat, CV_8UC3},
    prelude::*,
    videoio::{
        VideoCapture, VideoWriter, CAP_ANY, CAP_PROP_BUFFERSIZE, CAP_PROP_FOURCC, CAP_PROP_FPS,
        CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH,
    },
};
use tracing::{info, warn};

/// Opens local cameras by index
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvBackend;

impl CaptureBackend for OpenCvBackend {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let index = config.device_index;
        let open_failed = |reason: String| CameraError::OpenFailed { index, reason };

        let mut capture = VideoCapture::new(index as i32, CAP_ANY).map_err(|e| open_failed(e.to_string()))?;
        if !capture.is_opened().map_err(|e| open_failed(e.to_string()))? {
            return Err(open_failed("device did not open".to_string()));
        }

        let (width, height) = config.resolution;
        // Hints only; drivers may ignore any of them
        let hints = [
            (CAP_PROP_FRAME_WIDTH, width as f64),
            (CAP_PROP_FRAME_HEIGHT, height as f64),
            (CAP_PROP_FPS, config.device_fps as f64),
            (CAP_PROP_BUFFERSIZE, 1.0),
        ];
        for (prop, value) in hints {
            if let Err(e) = capture.set(prop, value) {
                warn!("Camera {} rejected property {}: {}", index, prop, e);
            }
        }
        match VideoWriter::fourcc('M', 'J', 'P', 'G') {
            Ok(code) => {
                if let Err(e) = capture.set(CAP_PROP_FOURCC, code as f64) {
                    warn!("Camera {} rejected MJPG: {}", index, e);
                }
            }
            Err(e) => warn!("Failed to build MJPG fourcc: {}", e),
        }

        let negotiated = |prop: i32, fallback: f64| capture.get(prop).ok().filter(|v| *v > 0.0).unwrap_or(fallback);
        let profile = DeviceProfile {
            width: negotiated(CAP_PROP_FRAME_WIDTH, width as f64) as u32,
            height: negotiated(CAP_PROP_FRAME_HEIGHT, height as f64) as u32,
            fps: negotiated(CAP_PROP_FPS, config.device_fps as f64),
        };
        info!(
            "Camera {} negotiated {}x{} @ {:.1}fps",
            index, profile.width, profile.height, profile.fps
        );

        Ok(Box::new(OpenCvDevice { capture, profile }))
    }
}

pub struct OpenCvDevice {
    capture: VideoCapture,
    profile: DeviceProfile,
}

impl CaptureDevice for OpenCvDevice {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let mut mat = Mat::default();
        let grabbed = self
            .capture
            .read(&mut mat)
            .map_err(|e| CameraError::ReadFailed(e.to_string()))?;
        if !grabbed || mat.empty() {
            return Err(CameraError::ReadFailed("empty frame".to_string()));
        }
        if mat.typ() != CV_8UC3 {
            return Err(CameraError::ReadFailed(format!("unsupported pixel type {}", mat.typ())));
        }

        let (width, height) = (mat.cols() as u32, mat.rows() as u32);
        let data = mat
            .data_bytes()
            .map_err(|e| CameraError::ReadFailed(e.to_string()))?
            .to_vec();
        Frame::from_raw(width, height, ChannelOrder::Bgr, data)
            .ok_or_else(|| CameraError::ReadFailed(format!("bad frame buffer for {}x{}", width, height)))
    }

    fn profile(&self) -> DeviceProfile {
        self.profile
    }

    fn release(&mut self) {
        if let Err(e) = self.capture.release() {
            warn!("Failed to release camera: {}", e);
        }
    }
}
