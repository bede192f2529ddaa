use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Object detector capability.
///
/// Each worker owns its own boxed instance, so `detect` takes `&mut self` and
/// one stream's inference never waits on the other's.
///
/// Implementations must treat the frame as read-only and must not retain it
/// beyond the call.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. An error skips only this frame.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult>;

    /// Optional warm-up hook, run once before the worker starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
