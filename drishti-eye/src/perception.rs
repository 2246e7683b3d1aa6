//! The current perception cache shared between the broadcaster and queries

use crate::detection::DetectionResult;
use crate::frame::Frame;
use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// A frame paired with the detections computed from it
#[derive(Debug, Clone)]
pub struct PerceptionSnapshot {
    pub frame: Frame,
    pub detections: DetectionResult,
    pub captured_at: DateTime<Local>,
}

/// Holds the latest [`PerceptionSnapshot`] behind one lock. Writers swap the
/// whole snapshot; readers get a copy of the whole snapshot.
#[derive(Debug, Default)]
pub struct SharedPerceptionState {
    current: Mutex<Option<PerceptionSnapshot>>,
}

impl SharedPerceptionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, frame: Frame, detections: DetectionResult) {
        let snapshot = PerceptionSnapshot {
            captured_at: frame.captured_at(),
            frame,
            detections,
        };
        *self.current.lock() = Some(snapshot);
    }

    pub fn read(&self) -> Option<PerceptionSnapshot> {
        self.current.lock().clone()
    }

    /// Back to empty, as on capture stop
    pub fn reset(&self) {
        *self.current.lock() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.current.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, DetectedObject};
    use crate::frame::ChannelOrder;
    use std::sync::Arc;
    use std::thread;

    /// Frame filled with `tag`, with detections labelled by the same tag
    fn tagged(tag: u8) -> (Frame, DetectionResult) {
        let frame = Frame::from_raw(8, 8, ChannelOrder::Rgb, vec![tag; 8 * 8 * 3]).unwrap();
        let detections = DetectionResult::new(
            (0..(tag % 4 + 1))
                .map(|_| DetectedObject::new(format!("tag{}", tag), 0.9, BoundingBox::new(0, 0, 4, 4)))
                .collect(),
        );
        (frame, detections)
    }

    #[test]
    fn test_empty_until_update() {
        let state = SharedPerceptionState::new();
        assert!(state.read().is_none());
        let (frame, detections) = tagged(1);
        state.update(frame, detections);
        let snapshot = state.read().unwrap();
        assert_eq!(snapshot.detections.object_count(), 2);
        assert_eq!(snapshot.captured_at, snapshot.frame.captured_at());
        state.reset();
        assert!(state.is_empty());
    }

    #[test]
    fn test_readers_never_see_mixed_snapshots() {
        let state = Arc::new(SharedPerceptionState::new());
        let writers: Vec<_> = (1..=4u8)
            .map(|tag| {
                let state = state.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let (frame, detections) = tagged(tag);
                        state.update(frame, detections);
                    }
                })
            })
            .collect();

        let reader = {
            let state = state.clone();
            thread::spawn(move || {
                for _ in 0..2000 {
                    if let Some(snapshot) = state.read() {
                        let tag = snapshot.frame.data()[0];
                        assert!(snapshot.frame.data().iter().all(|b| *b == tag));
                        assert_eq!(snapshot.detections.object_count(), (tag % 4 + 1) as usize);
                        let expected = format!("tag{}", tag);
                        assert!(snapshot.detections.objects.iter().all(|o| o.label == expected));
                    }
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();
    }
}
