use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Stub backend. Never reports anything; useful to exercise acquisition and
/// baseline sampling without a model.
#[derive(Debug, Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult> {
        Ok(DetectionResult::default())
    }
}
