//! Scene composition: turns per-camera boxes into the sentence fragment the
//! narrator speaks about.

use std::collections::BTreeSet;

use ml_core::BoundingBox;

use crate::explorer::state::{Camera, PerCamera};

/// Sorted, de-duplicated labels.
pub(crate) fn scene_labels(boxes: &[BoundingBox]) -> Vec<&str> {
    boxes
        .iter()
        .map(|b| b.label.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// `"{front} ahead and {rear} behind"`, either half alone, or `None` when both
/// cameras see nothing. Ordering is canonical so the same set of objects always
/// yields the same scene regardless of detector output order.
pub(crate) fn describe_scene(boxes: &PerCamera<Vec<BoundingBox>>) -> Option<String> {
    let parts: Vec<String> = Camera::ALL
        .iter()
        .filter_map(|&camera| {
            let labels = scene_labels(&boxes[camera]);
            (!labels.is_empty()).then(|| format!("{} {}", labels.join(", "), camera.direction()))
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" and "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes(labels: &[&str]) -> Vec<BoundingBox> {
        labels
            .iter()
            .map(|label| BoundingBox::new(0, 0, 10, 10, *label))
            .collect()
    }

    #[test]
    fn front_only() {
        let scene = describe_scene(&PerCamera::new(boxes(&["person", "chair"]), Vec::new()));
        assert_eq!(scene.as_deref(), Some("chair, person ahead"));
    }

    #[test]
    fn both_cameras() {
        let scene = describe_scene(&PerCamera::new(boxes(&["dog"]), boxes(&["cup", "bottle"])));
        assert_eq!(scene.as_deref(), Some("dog ahead and bottle, cup behind"));
    }

    #[test]
    fn rear_only() {
        let scene = describe_scene(&PerCamera::new(Vec::new(), boxes(&["cat"])));
        assert_eq!(scene.as_deref(), Some("cat behind"));
    }

    #[test]
    fn nothing_seen() {
        assert_eq!(describe_scene(&PerCamera::default()), None);
    }

    #[test]
    fn duplicates_and_order_collapse() {
        let a = describe_scene(&PerCamera::new(boxes(&["dog", "cat", "dog"]), Vec::new()));
        let b = describe_scene(&PerCamera::new(boxes(&["cat", "dog"]), Vec::new()));
        assert_eq!(a, b);
        assert_eq!(a.as_deref(), Some("cat, dog ahead"));
    }
}
