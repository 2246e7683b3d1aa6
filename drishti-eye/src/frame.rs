//! Captured frames

use bytes::Bytes;
use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Display format of frame and response timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Byte order of the three colour channels in a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelOrder {
    /// OpenCV's native order
    Bgr,
    Rgb,
}

/// One captured image, 8 bits per channel, three channels, row-major.
///
/// Pixels are immutable once a frame is built: the capture loop reads every
/// frame into a fresh buffer, so a clone is an independent copy that capture
/// can never overwrite.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    order: ChannelOrder,
    data: Bytes,
    sequence: u64,
    captured_at: DateTime<Local>,
}

impl Frame {
    /// Wrap a raw pixel buffer. Returns `None` if `data` is not exactly
    /// `width * height * 3` bytes.
    pub fn from_raw(width: u32, height: u32, order: ChannelOrder, data: impl Into<Bytes>) -> Option<Self> {
        let data = data.into();
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)?;
        if width == 0 || height == 0 || data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            order,
            data,
            sequence: 0,
            captured_at: Local::now(),
        })
    }

    /// Build an RGB frame from an image
    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            order: ChannelOrder::Rgb,
            data: Bytes::from(image.into_raw()),
            sequence: 0,
            captured_at: Local::now(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Local>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Position of this frame within its capture session, starting at 1.
    /// Zero for frames that did not come from a session.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    /// Capture time in [`TIMESTAMP_FORMAT`]
    pub fn timestamp_label(&self) -> String {
        self.captured_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// RGB value of one pixel
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        let px = &self.data[idx..idx + 3];
        Some(match self.order {
            ChannelOrder::Rgb => [px[0], px[1], px[2]],
            ChannelOrder::Bgr => [px[2], px[1], px[0]],
        })
    }

    /// Copy into an RGB image buffer for drawing and encoding
    pub fn to_rgb_image(&self) -> RgbImage {
        let raw = match self.order {
            ChannelOrder::Rgb => self.data.to_vec(),
            ChannelOrder::Bgr => {
                let mut raw = Vec::with_capacity(self.data.len());
                for px in self.data.chunks_exact(3) {
                    raw.extend_from_slice(&[px[2], px[1], px[0]]);
                }
                raw
            }
        };
        // Length was checked when the frame was built
        RgbImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_checks_length() {
        assert!(Frame::from_raw(2, 2, ChannelOrder::Rgb, vec![0u8; 12]).is_some());
        assert!(Frame::from_raw(2, 2, ChannelOrder::Rgb, vec![0u8; 11]).is_none());
        assert!(Frame::from_raw(0, 2, ChannelOrder::Rgb, Vec::<u8>::new()).is_none());
    }

    #[test]
    fn test_bgr_is_swapped_to_rgb() {
        let frame = Frame::from_raw(1, 1, ChannelOrder::Bgr, vec![10u8, 20, 30]).unwrap();
        assert_eq!(frame.rgb_at(0, 0), Some([30, 20, 10]));
        let image = frame.to_rgb_image();
        assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn test_rgb_at_out_of_bounds() {
        let frame = Frame::from_raw(1, 1, ChannelOrder::Rgb, vec![1u8, 2, 3]).unwrap();
        assert_eq!(frame.rgb_at(1, 0), None);
    }

    #[test]
    fn test_clone_is_independent_of_source_buffer() {
        let mut raw = vec![7u8; 12];
        let frame = Frame::from_raw(2, 2, ChannelOrder::Rgb, raw.clone()).unwrap();
        let copy = frame.clone();
        raw[0] = 0;
        drop(frame);
        assert_eq!(copy.data()[0], 7);
    }

    #[test]
    fn test_sequence_and_timestamp_label() {
        let frame = Frame::from_rgb_image(RgbImage::new(4, 4)).with_sequence(9);
        assert_eq!(frame.sequence(), 9);
        assert_eq!(frame.timestamp_label().len(), "2024-01-01 00:00:00".len());
    }
}
