//! Decoding of YOLO-family output tensors into pixel-space detections.
//!
//! Two layouts are understood:
//! - anchor rows `[cx, cy, w, h, class scores...]` (YOLOv8/v11 heads, need NMS);
//! - end-to-end rows `[x1, y1, x2, y2, score, class]` (NMS-free heads).
//!
//! Coordinates are in model-input space until mapped back through [`Letterbox`].

use std::cmp::Ordering;

/// Detection in model-input coordinates (`x1, y1, x2, y2`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: usize,
}

/// Aspect-preserving resize of a source image into a square model input, with
/// the remainder padded evenly on both sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl Letterbox {
    pub fn fit(source_width: u32, source_height: u32, input_size: u32) -> Self {
        let width = source_width.max(1) as f32;
        let height = source_height.max(1) as f32;
        let input = input_size as f32;
        let scale = (input / width).min(input / height);
        let pad_x = (input - (width * scale).round()) / 2.0;
        let pad_y = (input - (height * scale).round()) / 2.0;
        Self {
            scale,
            pad_x,
            pad_y,
            source_width: source_width.max(1),
            source_height: source_height.max(1),
        }
    }

    /// Size the source is resized to before padding.
    pub fn resized_size(&self) -> (u32, u32) {
        (
            ((self.source_width as f32) * self.scale).round().max(1.0) as u32,
            ((self.source_height as f32) * self.scale).round().max(1.0) as u32,
        )
    }

    /// Map a model-space box back to clamped integer source pixels.
    pub fn to_source(&self, bbox: [f32; 4]) -> [i32; 4] {
        let max_x = (self.source_width - 1) as f32;
        let max_y = (self.source_height - 1) as f32;
        let x = |v: f32| ((v - self.pad_x) / self.scale).clamp(0.0, max_x).round() as i32;
        let y = |v: f32| ((v - self.pad_y) / self.scale).clamp(0.0, max_y).round() as i32;
        [x(bbox[0]), y(bbox[1]), x(bbox[2]), y(bbox[3])]
    }
}

/// Decode `[cx, cy, w, h, class scores...]` rows, keeping each row's best class
/// when it reaches `confidence`.
pub fn decode_anchor_rows(rows: &[Vec<f32>], confidence: f32) -> Vec<RawDetection> {
    let mut detections = Vec::new();
    for row in rows {
        if row.len() < 5 {
            continue;
        }
        let Some((class_id, score)) = row[4..]
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        else {
            continue;
        };
        if score < confidence {
            continue;
        }
        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        detections.push(RawDetection {
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            score,
            class_id,
        });
    }
    detections
}

/// Decode `[x1, y1, x2, y2, score, class]` rows from NMS-free heads.
pub fn decode_end_to_end_rows(rows: &[Vec<f32>], confidence: f32) -> Vec<RawDetection> {
    rows.iter()
        .filter(|row| row.len() >= 6 && row[4] >= confidence)
        .map(|row| RawDetection {
            bbox: [row[0], row[1], row[2], row[3]],
            score: row[4],
            class_id: row[5].max(0.0) as usize,
        })
        .collect()
}

/// Greedy per-class suppression; survivors are returned highest score first.
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = kept.iter().any(|existing| {
            existing.class_id == candidate.class_id
                && iou(&existing.bbox, &candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = ix * iy;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - intersection;
    if union <= 0.0 { 0.0 } else { intersection / union }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_pads_the_short_side() {
        let lb = Letterbox::fit(640, 480, 640);
        assert_eq!(lb.scale, 1.0);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
        assert_eq!(lb.resized_size(), (640, 480));
        assert_eq!(lb.to_source([0.0, 80.0, 640.0, 560.0]), [0, 0, 639, 479]);
    }

    #[test]
    fn letterbox_scales_down_large_sources() {
        let lb = Letterbox::fit(1280, 720, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.resized_size(), (640, 360));
        assert_eq!(lb.to_source([100.0, 140.0, 200.0, 240.0]), [200, 0, 400, 200]);
    }

    #[test]
    fn anchor_rows_keep_best_class_above_threshold() {
        let rows = vec![
            vec![50.0, 50.0, 20.0, 10.0, 0.1, 0.8, 0.05],
            vec![10.0, 10.0, 4.0, 4.0, 0.2, 0.1, 0.25],
        ];
        let dets = decode_anchor_rows(&rows, 0.3);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
        assert_eq!(dets[0].bbox, [40.0, 45.0, 60.0, 55.0]);
    }

    #[test]
    fn end_to_end_rows_filter_on_score() {
        let rows = vec![
            vec![1.0, 2.0, 3.0, 4.0, 0.9, 16.0],
            vec![1.0, 2.0, 3.0, 4.0, 0.1, 15.0],
        ];
        let dets = decode_end_to_end_rows(&rows, 0.3);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 16);
    }

    #[test]
    fn nms_suppresses_same_class_overlap_only() {
        let dets = vec![
            RawDetection { bbox: [0.0, 0.0, 10.0, 10.0], score: 0.6, class_id: 0 },
            RawDetection { bbox: [1.0, 1.0, 10.0, 10.0], score: 0.9, class_id: 0 },
            RawDetection { bbox: [1.0, 1.0, 10.0, 10.0], score: 0.5, class_id: 2 },
            RawDetection { bbox: [50.0, 50.0, 60.0, 60.0], score: 0.4, class_id: 0 },
        ];
        let kept = non_max_suppression(dets, 0.45);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].score, 0.9);
        assert!(kept.iter().any(|d| d.class_id == 2));
        assert!(kept.iter().all(|d| d.score != 0.6));
    }
}
