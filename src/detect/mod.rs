mod backend;
pub mod backends;
mod filter;
mod result;

use anyhow::Result;

pub use backend::Detector;
#[cfg(feature = "backend-tract")]
pub use backends::YoloTractBackend;
pub use backends::{ScriptedBackend, StubBackend};
pub use filter::{CategoryFilter, DEFAULT_CATEGORIES};
pub use result::{BoundingBox, Detection, DetectionResult};

use crate::config::{DetectorBackendKind, DetectorSettings};
use crate::frame::StreamKind;

/// Build the detector instance for one stream's worker.
///
/// Each worker gets its own instance so the two streams never contend on a
/// shared model.
pub fn build_detector(settings: &DetectorSettings, stream: StreamKind) -> Result<Box<dyn Detector>> {
    let mut detector: Box<dyn Detector> = match settings.backend {
        DetectorBackendKind::Stub => Box::new(StubBackend::new()),
        DetectorBackendKind::Scripted => {
            Box::new(ScriptedBackend::new(settings.scripted_for(stream).to_vec()))
        }
        DetectorBackendKind::Yolov5 => build_yolo(settings)?,
    };
    detector.warm_up()?;
    log::info!("{} worker using detector backend '{}'", stream, detector.name());
    Ok(detector)
}

#[cfg(feature = "backend-tract")]
fn build_yolo(settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("yolov5 backend requires a model path"))?;
    Ok(Box::new(
        YoloTractBackend::new(model_path)?.with_min_confidence(settings.min_confidence),
    ))
}

#[cfg(not(feature = "backend-tract"))]
fn build_yolo(_settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    anyhow::bail!("yolov5 backend requires the backend-tract feature")
}
