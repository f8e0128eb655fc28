use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use image::ImageFormat;
use ml_core::{BoundingBox, ObjectDetector};
use tracing::{debug, warn};

use crate::explorer::{
    pacing::Cycle,
    state::{Camera, PerCamera, SharedState},
    watchdog::HealthComponent,
};

const SLOW_SCAN: Duration = Duration::from_millis(500);

/// Single detector shared by both cameras. Cameras alternate every cycle and
/// scanning stops entirely while the narrator is speaking.
pub(crate) struct DetectionLoop {
    state: Arc<SharedState>,
    detector: Box<dyn ObjectDetector>,
    thresholds: PerCamera<f32>,
    next: Camera,
    interval: Duration,
    busy_pause: Duration,
}

impl DetectionLoop {
    pub(crate) fn new(
        state: Arc<SharedState>,
        detector: Box<dyn ObjectDetector>,
        thresholds: PerCamera<f32>,
        interval: Duration,
        busy_pause: Duration,
    ) -> Self {
        Self {
            state,
            detector,
            thresholds,
            next: Camera::Front,
            interval,
            busy_pause,
        }
    }

    fn select_camera(&mut self) -> Camera {
        let camera = self.next;
        self.next = camera.other();
        camera
    }

    fn scan(&self, camera: Camera, jpeg: &[u8]) -> Result<Vec<BoundingBox>> {
        let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
            .context("failed to decode published frame")?
            .to_rgb8();

        let started = Instant::now();
        let boxes = self.detector.detect(&image, self.thresholds[camera])?;
        let elapsed = started.elapsed();

        metrics::histogram!("explorer_detection_seconds", "camera" => camera.label())
            .record(elapsed.as_secs_f64());
        if elapsed > SLOW_SCAN {
            warn!(%camera, "vision scan: {:.2}s", elapsed.as_secs_f32());
        }
        Ok(boxes)
    }
}

impl Cycle for DetectionLoop {
    fn component(&self) -> HealthComponent {
        HealthComponent::Detector
    }

    fn cycle(&mut self) -> Duration {
        if self.state.is_busy() {
            metrics::counter!("explorer_detector_busy_skips_total").increment(1);
            return self.busy_pause;
        }

        let camera = self.select_camera();
        let Some(jpeg) = self.state.latest_frame(camera) else {
            return self.interval;
        };

        let boxes = match self.scan(camera, &jpeg) {
            Ok(boxes) => boxes,
            Err(err) => {
                warn!(%camera, "detection failed: {err:#}");
                metrics::counter!("explorer_detection_errors_total", "camera" => camera.label())
                    .increment(1);
                Vec::new()
            }
        };

        metrics::gauge!("explorer_detection_boxes", "camera" => camera.label())
            .set(boxes.len() as f64);
        if !self.state.publish_boxes_if_idle(camera, boxes) {
            debug!(%camera, "narration started mid-scan; discarding result");
        }
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::explorer::annotation::encode_jpeg;

    const FRONT_THRESHOLD: f32 = 0.3;
    const REAR_THRESHOLD: f32 = 0.6;

    enum Behaviour {
        Label(&'static str),
        Fail,
        GoBusy,
    }

    /// Records the threshold of every call, which identifies the camera.
    struct StubDetector {
        calls: Arc<Mutex<Vec<f32>>>,
        behaviour: Behaviour,
        state: Arc<SharedState>,
    }

    impl ObjectDetector for StubDetector {
        fn detect(&self, _image: &RgbImage, confidence: f32) -> Result<Vec<BoundingBox>> {
            self.calls.lock().unwrap().push(confidence);
            match self.behaviour {
                Behaviour::Label(label) => Ok(vec![BoundingBox::new(1, 1, 5, 5, label)]),
                Behaviour::Fail => bail!("model exploded"),
                Behaviour::GoBusy => {
                    self.state.force_busy(true);
                    Ok(vec![BoundingBox::new(1, 1, 5, 5, "ghost")])
                }
            }
        }
    }

    fn jpeg() -> Vec<u8> {
        encode_jpeg(&RgbImage::from_pixel(16, 16, Rgb([90, 90, 90])), 80).expect("encodes")
    }

    fn harness(behaviour: Behaviour) -> (Arc<SharedState>, Arc<Mutex<Vec<f32>>>, DetectionLoop) {
        let state = Arc::new(SharedState::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let detector = StubDetector {
            calls: calls.clone(),
            behaviour,
            state: state.clone(),
        };
        let detection = DetectionLoop::new(
            state.clone(),
            Box::new(detector),
            PerCamera::new(FRONT_THRESHOLD, REAR_THRESHOLD),
            Duration::from_millis(50),
            Duration::from_millis(500),
        );
        (state, calls, detection)
    }

    #[test]
    fn cameras_alternate_every_cycle() {
        let (state, calls, mut detection) = harness(Behaviour::Label("cat"));
        state.publish_frame(Camera::Front, jpeg());
        state.publish_frame(Camera::Rear, jpeg());

        for _ in 0..7 {
            assert_eq!(detection.cycle(), Duration::from_millis(50));
        }
        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 7);
        for pair in calls.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert_eq!(calls[0], FRONT_THRESHOLD);
        assert_eq!(calls.iter().filter(|&&t| t == FRONT_THRESHOLD).count(), 4);
        assert_eq!(state.boxes(Camera::Front)[0].label, "cat");
        assert_eq!(state.boxes(Camera::Rear)[0].label, "cat");
    }

    #[test]
    fn missing_frame_still_advances_the_toggle() {
        let (state, calls, mut detection) = harness(Behaviour::Label("cat"));
        state.publish_frame(Camera::Rear, jpeg());

        detection.cycle();
        detection.cycle();
        assert_eq!(*calls.lock().unwrap(), vec![REAR_THRESHOLD]);
        assert!(state.boxes(Camera::Front).is_empty());
    }

    #[test]
    fn busy_pauses_scanning_without_toggling() {
        let (state, calls, mut detection) = harness(Behaviour::Label("cat"));
        state.publish_frame(Camera::Front, jpeg());
        state.publish_frame(Camera::Rear, jpeg());

        let guard = state.begin_utterance();
        for _ in 0..3 {
            assert_eq!(detection.cycle(), Duration::from_millis(500));
        }
        assert!(calls.lock().unwrap().is_empty());
        drop(guard);

        detection.cycle();
        assert_eq!(*calls.lock().unwrap(), vec![FRONT_THRESHOLD]);
    }

    #[test]
    fn scan_finishing_during_narration_is_discarded() {
        let (state, _calls, mut detection) = harness(Behaviour::GoBusy);
        state.publish_frame(Camera::Front, jpeg());
        state.force_busy(false);
        assert!(state.publish_boxes_if_idle(Camera::Front, vec![BoundingBox::new(0, 0, 1, 1, "dog")]));

        detection.cycle();
        assert!(state.is_busy());
        let front = state.boxes(Camera::Front);
        assert_eq!(front.len(), 1);
        assert_eq!(front[0].label, "dog");
    }

    #[test]
    fn detector_error_clears_stale_boxes() {
        let (state, _calls, mut detection) = harness(Behaviour::Fail);
        state.publish_frame(Camera::Front, jpeg());
        state.publish_boxes_if_idle(Camera::Front, vec![BoundingBox::new(0, 0, 1, 1, "dog")]);

        assert_eq!(detection.cycle(), Duration::from_millis(50));
        assert!(state.boxes(Camera::Front).is_empty());
    }

    #[test]
    fn undecodable_frame_publishes_no_boxes() {
        let (state, calls, mut detection) = harness(Behaviour::Label("cat"));
        state.publish_frame(Camera::Front, b"not a jpeg".to_vec());
        state.publish_boxes_if_idle(Camera::Front, vec![BoundingBox::new(0, 0, 1, 1, "dog")]);

        detection.cycle();
        assert!(calls.lock().unwrap().is_empty());
        assert!(state.boxes(Camera::Front).is_empty());
    }
}
