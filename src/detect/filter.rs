use std::collections::BTreeSet;

use crate::detect::result::{Detection, DetectionResult};

/// Default categories of interest.
pub const DEFAULT_CATEGORIES: [&str; 5] = ["sheep", "horse", "cow", "dog", "person"];

/// Decides which detections are worth recording: confidence at or above the
/// threshold and a label in the category set. Other labels are ignored no
/// matter how confident the detector is.
#[derive(Clone, Debug)]
pub struct CategoryFilter {
    confidence_threshold: f32,
    categories: BTreeSet<String>,
}

impl CategoryFilter {
    pub fn new<I, S>(confidence_threshold: f32, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            confidence_threshold,
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(String::as_str)
    }

    pub fn qualifies(&self, detection: &Detection) -> bool {
        detection.confidence >= self.confidence_threshold
            && self.categories.contains(detection.label.as_str())
    }

    /// Qualifying detections, in detector order.
    pub fn qualifying<'a>(&self, result: &'a DetectionResult) -> Vec<&'a Detection> {
        result.iter().filter(|d| self.qualifies(d)).collect()
    }

    /// True when at least one detection qualifies.
    pub fn passes(&self, result: &DetectionResult) -> bool {
        result.iter().any(|d| self.qualifies(d))
    }
}

impl Default for CategoryFilter {
    fn default() -> Self {
        Self::new(0.5, DEFAULT_CATEGORIES)
    }
}
