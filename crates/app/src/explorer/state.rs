//! Process-wide state shared by the capture, detection and narration loops and
//! read by the HTTP gateway.
//!
//! One mutex guards the whole aggregate. Every accessor takes it for a single
//! copy in or copy out and returns owned data, so no caller ever holds the lock
//! across a capture, an inference, a synthesis or a network write.

use std::{
    fmt,
    ops::{Index, IndexMut},
    sync::{Mutex, MutexGuard, PoisonError},
};

use ml_core::BoundingBox;
use serde::Serialize;

pub(crate) const INITIAL_CAPTION: &str = "System Initializing...";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Camera {
    Front,
    Rear,
}

impl Camera {
    pub(crate) const ALL: [Camera; 2] = [Camera::Front, Camera::Rear];

    pub(crate) fn label(self) -> &'static str {
        match self {
            Camera::Front => "front",
            Camera::Rear => "rear",
        }
    }

    /// Direction word used when composing a scene.
    pub(crate) fn direction(self) -> &'static str {
        match self {
            Camera::Front => "ahead",
            Camera::Rear => "behind",
        }
    }

    pub(crate) fn other(self) -> Camera {
        match self {
            Camera::Front => Camera::Rear,
            Camera::Rear => Camera::Front,
        }
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One value per camera, addressable by [`Camera`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub(crate) struct PerCamera<T> {
    pub(crate) front: T,
    pub(crate) rear: T,
}

impl<T> PerCamera<T> {
    pub(crate) fn new(front: T, rear: T) -> Self {
        Self { front, rear }
    }
}

impl<T> Index<Camera> for PerCamera<T> {
    type Output = T;

    fn index(&self, camera: Camera) -> &T {
        match camera {
            Camera::Front => &self.front,
            Camera::Rear => &self.rear,
        }
    }
}

impl<T> IndexMut<Camera> for PerCamera<T> {
    fn index_mut(&mut self, camera: Camera) -> &mut T {
        match camera {
            Camera::Front => &mut self.front,
            Camera::Rear => &mut self.rear,
        }
    }
}

/// Payload of `/status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub(crate) struct Status {
    pub(crate) caption: String,
    pub(crate) audio_id: u64,
}

/// The published utterance together with the version it was published under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AudioClip {
    pub(crate) wav: Vec<u8>,
    pub(crate) version: u64,
}

/// Payload of `/detections`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct DetectionSnapshot {
    #[serde(flatten)]
    pub(crate) boxes: PerCamera<Vec<BoundingBox>>,
    pub(crate) busy: bool,
}

struct Inner {
    frames: PerCamera<Option<Vec<u8>>>,
    boxes: PerCamera<Vec<BoundingBox>>,
    caption: String,
    audio: Option<Vec<u8>>,
    audio_version: u64,
    busy: bool,
}

pub(crate) struct SharedState {
    inner: Mutex<Inner>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: PerCamera::default(),
                boxes: PerCamera::default(),
                caption: INITIAL_CAPTION.to_string(),
                audio: None,
                audio_version: 0,
                busy: false,
            }),
        }
    }

    // A loop that panicked mid-update leaves whole fields behind, never torn ones.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish_frame(&self, camera: Camera, jpeg: Vec<u8>) {
        self.lock().frames[camera] = Some(jpeg);
    }

    pub(crate) fn latest_frame(&self, camera: Camera) -> Option<Vec<u8>> {
        self.lock().frames[camera].clone()
    }

    pub(crate) fn boxes(&self, camera: Camera) -> Vec<BoundingBox> {
        self.lock().boxes[camera].clone()
    }

    /// Both cameras' boxes read under one lock.
    pub(crate) fn all_boxes(&self) -> PerCamera<Vec<BoundingBox>> {
        self.lock().boxes.clone()
    }

    pub(crate) fn detections(&self) -> DetectionSnapshot {
        let inner = self.lock();
        DetectionSnapshot {
            boxes: inner.boxes.clone(),
            busy: inner.busy,
        }
    }

    /// Replace `camera`'s boxes unless an utterance is in progress. The busy
    /// check and the write share one critical section, so a scan that finishes
    /// after narration starts is discarded rather than published.
    pub(crate) fn publish_boxes_if_idle(&self, camera: Camera, boxes: Vec<BoundingBox>) -> bool {
        let mut inner = self.lock();
        if inner.busy {
            return false;
        }
        inner.boxes[camera] = boxes;
        true
    }

    pub(crate) fn status(&self) -> Status {
        let inner = self.lock();
        Status {
            caption: inner.caption.clone(),
            audio_id: inner.audio_version,
        }
    }

    pub(crate) fn latest_audio(&self) -> Option<AudioClip> {
        let inner = self.lock();
        inner.audio.as_ref().map(|wav| AudioClip {
            wav: wav.clone(),
            version: inner.audio_version,
        })
    }

    /// Publish caption and audio together and bump the version in the same
    /// critical section. Returns the new version.
    pub(crate) fn publish_speech(&self, caption: String, wav: Vec<u8>) -> u64 {
        let mut inner = self.lock();
        inner.caption = caption;
        inner.audio = Some(wav);
        inner.audio_version += 1;
        inner.audio_version
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.lock().busy
    }

    /// Mark an utterance in progress until the returned guard drops.
    pub(crate) fn begin_utterance(&self) -> UtteranceGuard<'_> {
        self.set_busy(true);
        UtteranceGuard { state: self }
    }

    fn set_busy(&self, busy: bool) {
        self.lock().busy = busy;
        metrics::gauge!("explorer_busy").set(if busy { 1.0 } else { 0.0 });
    }

    #[cfg(test)]
    pub(crate) fn force_busy(&self, busy: bool) {
        self.set_busy(busy);
    }
}

/// Clears the busy flag on drop, including when narration unwinds.
pub(crate) struct UtteranceGuard<'a> {
    state: &'a SharedState,
}

impl Drop for UtteranceGuard<'_> {
    fn drop(&mut self) {
        self.state.set_busy(false);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
    };

    use super::*;

    fn cat() -> BoundingBox {
        BoundingBox::new(1, 2, 3, 4, "cat")
    }

    #[test]
    fn starts_with_placeholder_caption_and_no_audio() {
        let state = SharedState::new();
        assert_eq!(
            state.status(),
            Status {
                caption: INITIAL_CAPTION.to_string(),
                audio_id: 0,
            }
        );
        assert!(state.latest_audio().is_none());
        assert!(state.latest_frame(Camera::Front).is_none());
        assert!(state.latest_frame(Camera::Rear).is_none());
        assert!(state.all_boxes().front.is_empty());
        assert!(!state.is_busy());
    }

    #[test]
    fn frames_are_kept_per_camera() {
        let state = SharedState::new();
        state.publish_frame(Camera::Rear, vec![1, 2, 3]);
        assert_eq!(state.latest_frame(Camera::Rear), Some(vec![1, 2, 3]));
        assert!(state.latest_frame(Camera::Front).is_none());

        state.publish_frame(Camera::Rear, vec![9]);
        assert_eq!(state.latest_frame(Camera::Rear), Some(vec![9]));
    }

    #[test]
    fn boxes_are_replaced_wholesale() {
        let state = SharedState::new();
        assert!(state.publish_boxes_if_idle(Camera::Front, vec![cat(), cat()]));
        assert!(state.publish_boxes_if_idle(Camera::Front, vec![cat()]));
        assert_eq!(state.boxes(Camera::Front).len(), 1);
        assert!(state.boxes(Camera::Rear).is_empty());
    }

    #[test]
    fn boxes_are_refused_while_busy() {
        let state = SharedState::new();
        let guard = state.begin_utterance();
        assert!(state.is_busy());
        assert!(!state.publish_boxes_if_idle(Camera::Front, vec![cat()]));
        assert!(state.boxes(Camera::Front).is_empty());
        drop(guard);
        assert!(!state.is_busy());
        assert!(state.publish_boxes_if_idle(Camera::Front, vec![cat()]));
    }

    #[test]
    fn busy_clears_when_narration_panics() {
        let state = SharedState::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = state.begin_utterance();
            panic!("synthesizer blew up");
        }));
        assert!(result.is_err());
        assert!(!state.is_busy());
    }

    #[test]
    fn speech_bumps_version_with_payload() {
        let state = SharedState::new();
        assert_eq!(state.publish_speech("Nemo: hi".into(), vec![7]), 1);
        assert_eq!(state.publish_speech("Nemo: again".into(), vec![8, 8]), 2);
        assert_eq!(
            state.latest_audio(),
            Some(AudioClip {
                wav: vec![8, 8],
                version: 2,
            })
        );
        assert_eq!(state.status().caption, "Nemo: again");
    }

    #[test]
    fn detections_serialize_per_camera_with_busy() {
        let state = SharedState::new();
        state.publish_boxes_if_idle(Camera::Rear, vec![cat()]);
        let json = serde_json::to_value(state.detections()).expect("serializes");
        assert_eq!(json["front"], serde_json::json!([]));
        assert_eq!(json["rear"][0]["label"], "cat");
        assert_eq!(json["busy"], false);
    }

    #[test]
    fn readers_never_see_torn_speech() {
        let state = Arc::new(SharedState::new());
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut last_seen = 0;
                    while !done.load(Ordering::Relaxed) {
                        if let Some(clip) = state.latest_audio() {
                            let expected = clip.version.to_le_bytes().to_vec();
                            assert_eq!(clip.wav, expected, "audio/version mismatch");
                            assert!(clip.version >= last_seen, "version went backwards");
                            last_seen = clip.version;
                        }
                        let status = state.status();
                        if status.audio_id > 0 {
                            assert_eq!(status.caption, format!("Nemo: {}", status.audio_id));
                        }
                    }
                })
            })
            .collect();

        for version in 1..=2_000_u64 {
            state.publish_speech(format!("Nemo: {version}"), version.to_le_bytes().to_vec());
        }
        done.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().expect("reader thread");
        }
        assert_eq!(state.status().audio_id, 2_000);
    }
}
