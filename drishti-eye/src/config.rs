//! Configuration for drishti-eye

use drishti_llm::ChatConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the answer service key
pub const API_KEY_ENV: &str = "DASHSCOPE_API_KEY";

/// Camera and stream settings, read once when a capture session starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera device index (0, 1, 2, etc.)
    pub device_index: u32,
    /// Requested camera resolution (width, height)
    pub resolution: (u32, u32),
    /// Requested device frame rate; also paces the acquisition loop
    pub device_fps: u32,
    /// Rate at which annotated frames are published to clients
    pub broadcast_fps: u32,
    /// JPEG quality (1-100) for published frames
    pub jpeg_quality: u8,
    /// Largest width sent over the transport
    pub max_width: u32,
    /// Largest height sent over the transport
    pub max_height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            resolution: (1280, 720),
            device_fps: 30,
            broadcast_fps: 20,
            jpeg_quality: 85,
            max_width: 1280,
            max_height: 720,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.device_fps == 0 || self.device_fps > 120 {
            return Err("Device frame rate must be between 1 and 120".to_string());
        }
        if self.broadcast_fps == 0 || self.broadcast_fps > 60 {
            return Err("Broadcast frame rate must be between 1 and 60".to_string());
        }
        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err("Resolution must be non-zero".to_string());
        }
        if self.resolution.0 > 7680 || self.resolution.1 > 4320 {
            return Err("Resolution too large (max 8K)".to_string());
        }
        if self.max_width == 0 || self.max_height == 0 {
            return Err("Maximum transport size must be non-zero".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }
        if self.device_index > 100 {
            return Err("Camera index too large (max 100)".to_string());
        }
        Ok(())
    }

    /// Time between two device reads
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.device_fps.max(1) as f64)
    }

    /// Time between two broadcast cycles
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.broadcast_fps.max(1) as f64)
    }
}

/// Detector thresholds and drawing policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Draw boxes and labels on published frames
    pub draw_boxes: bool,
    /// Draw the capture time in the lower-right corner
    pub draw_timestamp: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            draw_boxes: true,
            draw_timestamp: true,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err("Confidence threshold must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err("IoU threshold must be within [0, 1]".to_string());
        }
        Ok(())
    }
}

/// HTTP/WebSocket listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub capture: CaptureConfig,
    pub detection: DetectionConfig,
    pub chat: ChatConfig,
    pub server: ServerConfig,
    /// Directory for capture-image output
    pub captures_dir: PathBuf,
    /// Use the synthetic camera and demo detector instead of real hardware
    pub demo: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            detection: DetectionConfig::default(),
            chat: ChatConfig::default(),
            server: ServerConfig::default(),
            captures_dir: PathBuf::from("static/captures"),
            demo: false,
        }
    }
}

impl AssistantConfig {
    /// Load from a TOML file; missing keys take their defaults
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("Invalid configuration: {}", e))
    }

    /// Apply environment overrides. An API key already set is kept.
    pub fn apply_env(&mut self) {
        if self.chat.has_api_key() {
            return;
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.chat.api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.capture.validate()?;
        self.detection.validate()?;
        self.chat.validate()?;
        if self.captures_dir.as_os_str().is_empty() {
            return Err("captures_dir must not be empty".to_string());
        }
        Ok(())
    }
}
