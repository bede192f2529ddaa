use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::{Detection, DetectionResult};
use crate::frame::Frame;

/// Backend that reports the same detections for every frame.
///
/// Drives the `stub://` demo configuration and end-to-end tests.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    detections: Vec<Detection>,
}

impl ScriptedBackend {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl Detector for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult> {
        Ok(DetectionResult::new(self.detections.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;
    use crate::frame::StreamKind;

    #[test]
    fn scripted_backend_repeats_script() {
        let horse = Detection::new("horse", 0.9, BoundingBox::new(0.1, 0.1, 0.3, 0.3));
        let mut backend = ScriptedBackend::new(vec![horse.clone()]);
        let frame = Frame::new(StreamKind::Optical, 1, 1, vec![0, 0, 0]).unwrap();
        for _ in 0..3 {
            assert_eq!(backend.detect(&frame).unwrap().detections, vec![horse.clone()]);
        }
    }
}
