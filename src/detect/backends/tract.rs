#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection, DetectionResult};
use crate::frame::Frame;

/// COCO class names in YOLOv5 output order.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.2;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// YOLOv5 ONNX detector running on tract.
///
/// Expects the stock export: input `[1, 3, S, S]` RGB in 0..1, output
/// `[1, N, 5 + classes]` rows of `(cx, cy, w, h, objectness, class scores...)`
/// in input pixel units.
pub struct YoloTractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    min_confidence: f32,
    iou_threshold: f32,
}

impl YoloTractBackend {
    /// Load a local ONNX model. No network access.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Self::with_input_size(model_path, DEFAULT_INPUT_SIZE)
    }

    pub fn with_input_size<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Drop candidates below this score before NMS.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(&frame.to_rgb_image(), side, side, FilterType::Triangle);
        let side = side as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, output: &Tensor) -> Result<Vec<Detection>> {
        let shape = output.shape();
        if shape.len() != 3 || shape[2] < 6 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let stride = shape[2];
        let data = output
            .as_slice::<f32>()
            .context("model output tensor was not f32")?;
        let side = self.input_size as f32;

        let mut candidates = Vec::new();
        for row in data.chunks_exact(stride) {
            let objectness = row[4];
            let Some((class_idx, class_score)) = row[5..]
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            let confidence = objectness * class_score;
            if confidence < self.min_confidence {
                continue;
            }
            let label = COCO_CLASSES
                .get(class_idx)
                .map(|name| name.to_string())
                .unwrap_or_else(|| format!("class{}", class_idx));
            let (cx, cy, w, h) = (row[0] / side, row[1] / side, row[2] / side, row[3] / side);
            candidates.push(Detection::new(
                label,
                confidence.clamp(0.0, 1.0),
                BoundingBox::new(cx - w / 2.0, cy - h / 2.0, w, h),
            ));
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl Detector for YoloTractBackend {
    fn name(&self) -> &'static str {
        "yolov5-tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        Ok(DetectionResult::new(self.decode(output)?))
    }
}

/// Per-label greedy NMS. Output is sorted by descending confidence.
fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.label == candidate.label && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
