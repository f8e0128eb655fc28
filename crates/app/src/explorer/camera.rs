use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};
use video_ingest::FrameGrabber;

use crate::explorer::{
    annotation::annotate_frame,
    pacing::Cycle,
    state::{Camera, SharedState},
    watchdog::HealthComponent,
};

/// Capture loop for one camera: grab, overlay the camera's current boxes,
/// encode, publish.
pub(crate) struct FrameSource {
    camera: Camera,
    grabber: Box<dyn FrameGrabber>,
    state: Arc<SharedState>,
    jpeg_quality: u8,
    interval: Duration,
    backoff: Duration,
}

impl FrameSource {
    pub(crate) fn new(
        camera: Camera,
        grabber: Box<dyn FrameGrabber>,
        state: Arc<SharedState>,
        jpeg_quality: u8,
        interval: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            camera,
            grabber,
            state,
            jpeg_quality,
            interval,
            backoff,
        }
    }
}

impl Cycle for FrameSource {
    fn component(&self) -> HealthComponent {
        HealthComponent::camera(self.camera)
    }

    fn cycle(&mut self) -> Duration {
        let Some(frame) = self.grabber.acquire() else {
            debug!(camera = %self.camera, "no frame from {}", self.grabber.describe());
            metrics::counter!("explorer_capture_failures_total", "camera" => self.camera.label())
                .increment(1);
            return self.backoff + self.interval;
        };

        // Boxes may be one detection cycle behind the pixels.
        let boxes = self.state.boxes(self.camera);
        match annotate_frame(&frame, &boxes, self.jpeg_quality) {
            Ok(jpeg) => {
                self.state.publish_frame(self.camera, jpeg);
                metrics::counter!("explorer_frames_published_total", "camera" => self.camera.label())
                    .increment(1);
            }
            Err(err) => warn!(camera = %self.camera, "dropping frame: {err:#}"),
        }
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use ml_core::BoundingBox;
    use video_ingest::{Frame, FrameFormat};

    use super::*;

    struct Scripted {
        frames: VecDeque<Option<Frame>>,
    }

    impl FrameGrabber for Scripted {
        fn acquire(&mut self) -> Option<Frame> {
            self.frames.pop_front().flatten()
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn frame() -> Frame {
        Frame {
            data: vec![128; 32 * 24 * 3],
            width: 32,
            height: 24,
            timestamp_ms: 0,
            format: FrameFormat::Rgb8,
        }
    }

    fn source(state: &Arc<SharedState>, frames: Vec<Option<Frame>>) -> FrameSource {
        FrameSource::new(
            Camera::Rear,
            Box::new(Scripted {
                frames: frames.into(),
            }),
            state.clone(),
            80,
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn publishes_encoded_frames_for_its_camera() {
        let state = Arc::new(SharedState::new());
        state.publish_boxes_if_idle(Camera::Rear, vec![BoundingBox::new(2, 12, 20, 22, "cup")]);
        let mut source = source(&state, vec![Some(frame())]);

        assert_eq!(source.cycle(), Duration::from_millis(100));
        let jpeg = state.latest_frame(Camera::Rear).expect("published");
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(state.latest_frame(Camera::Front).is_none());
    }

    #[test]
    fn capture_failure_backs_off_and_keeps_previous_frame() {
        let state = Arc::new(SharedState::new());
        let mut source = source(&state, vec![Some(frame()), None]);
        source.cycle();
        let first = state.latest_frame(Camera::Rear);

        assert_eq!(source.cycle(), Duration::from_millis(1_100));
        assert_eq!(state.latest_frame(Camera::Rear), first);
    }

    #[test]
    fn malformed_frames_are_not_published() {
        let state = Arc::new(SharedState::new());
        let mut bad = frame();
        bad.data.truncate(10);
        let mut source = source(&state, vec![Some(bad)]);
        assert_eq!(source.cycle(), Duration::from_millis(100));
        assert!(state.latest_frame(Camera::Rear).is_none());
    }
}
