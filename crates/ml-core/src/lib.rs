//! Object detection for the explorer: the [`ObjectDetector`] seam, the box type
//! it produces, and YOLO output post-processing shared by every backend.

mod labels;
mod postprocess;

#[cfg(feature = "with-tch")]
pub mod detector;
#[cfg(feature = "with-tch")]
mod runtime;

pub use image::RgbImage;
pub use labels::{COCO_LABELS, label_for};
pub use postprocess::{
    Letterbox, RawDetection, decode_anchor_rows, decode_end_to_end_rows, non_max_suppression,
};

use serde::Serialize;

/// Labelled detection in source-image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub label: String,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, label: impl Into<String>) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            label: label.into(),
        }
    }
}

/// Scores one image. Output order is whatever the model emits.
pub trait ObjectDetector: Send {
    fn detect(&self, image: &RgbImage, confidence: f32) -> anyhow::Result<Vec<BoundingBox>>;
}

#[cfg(feature = "with-tch")]
pub use tch;
