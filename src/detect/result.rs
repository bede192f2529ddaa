use serde::{Deserialize, Serialize};

/// Axis-aligned box in normalised (0..1) frame coordinates.
/// `x`/`y` are the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Scale to pixel coordinates, clamped to the frame: `(x0, y0, x1, y1)`.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let fw = width as f32;
        let fh = height as f32;
        let clamp_x = |v: f32| (v * fw).round().clamp(0.0, (width.max(1) - 1) as f32) as u32;
        let clamp_y = |v: f32| (v * fh).round().clamp(0.0, (height.max(1) - 1) as f32) as u32;
        (
            clamp_x(self.x),
            clamp_y(self.y),
            clamp_x(self.x + self.w),
            clamp_y(self.y + self.h),
        )
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.w).min(other.x + other.w);
        let y1 = (self.y + self.h).min(other.y + other.h);
        let inter = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One labelled box reported by a detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// 0.0..=1.0
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Ordered detections for a single processed frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }
}

impl From<Vec<Detection>> for DetectionResult {
    fn from(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}
