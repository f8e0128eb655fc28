use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};
use voice::{SpeechSynthesizer, ThoughtGenerator, encode_wav};

use crate::explorer::{
    pacing::Cycle,
    scene::describe_scene,
    state::SharedState,
    watchdog::HealthComponent,
};

pub(crate) const CAPTION_PREFIX: &str = "Nemo: ";

/// Watches the combined scene and speaks when it changes: generate a thought,
/// synthesize it, then publish caption and audio together.
pub(crate) struct Narrator {
    state: Arc<SharedState>,
    generator: Box<dyn ThoughtGenerator>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    last_spoken: String,
    interval: Duration,
    cooldown: Duration,
}

impl Narrator {
    pub(crate) fn new(
        state: Arc<SharedState>,
        generator: Box<dyn ThoughtGenerator>,
        synthesizer: Box<dyn SpeechSynthesizer>,
        interval: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            state,
            generator,
            synthesizer,
            last_spoken: String::new(),
            interval,
            cooldown,
        }
    }

    /// Speak about `scene` while holding the busy flag. Nothing is published
    /// when synthesis fails.
    fn speak(&self, scene: &str) {
        let _utterance = self.state.begin_utterance();

        let thought = match self.generator.generate(scene) {
            Ok(thought) if !thought.trim().is_empty() => thought,
            Ok(_) => fallback_thought(scene),
            Err(err) => {
                warn!("brain freeze: {err}");
                metrics::counter!("explorer_generation_fallbacks_total").increment(1);
                fallback_thought(scene)
            }
        };

        let wav = match self
            .synthesizer
            .synthesize(&thought)
            .and_then(|speech| encode_wav(&speech))
        {
            Ok(wav) => wav,
            Err(err) => {
                warn!("vocal error: {err}");
                metrics::counter!("explorer_synthesis_failures_total").increment(1);
                return;
            }
        };

        let version = self.state.publish_speech(format!("{CAPTION_PREFIX}{thought}"), wav);
        metrics::counter!("explorer_narrations_total").increment(1);
        info!(audio_id = version, "Nemo: '{thought}'");
    }
}

fn fallback_thought(scene: &str) -> String {
    format!("I see {scene}.")
}

impl Cycle for Narrator {
    fn component(&self) -> HealthComponent {
        HealthComponent::Narrator
    }

    fn cycle(&mut self) -> Duration {
        let boxes = self.state.all_boxes();
        let Some(scene) = describe_scene(&boxes) else {
            return self.interval;
        };
        if scene == self.last_spoken {
            return self.interval;
        }

        debug!(%scene, "scene changed");
        self.speak(&scene);
        // Recorded even when synthesis failed.
        self.last_spoken = scene;
        self.cooldown + self.interval
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ml_core::BoundingBox;
    use voice::{Speech, VoiceError};

    use super::*;
    use crate::explorer::state::{Camera, INITIAL_CAPTION};

    const INTERVAL: Duration = Duration::from_millis(100);
    const COOLDOWN: Duration = Duration::from_secs(2);

    #[derive(Default)]
    struct Log {
        scenes: Vec<String>,
        spoken: Vec<String>,
        busy_during_generation: Vec<bool>,
        busy_during_synthesis: Vec<bool>,
    }

    struct StubGenerator {
        log: Arc<Mutex<Log>>,
        state: Arc<SharedState>,
        fail: bool,
    }

    impl ThoughtGenerator for StubGenerator {
        fn generate(&self, scene: &str) -> Result<String, VoiceError> {
            let mut log = self.log.lock().unwrap();
            log.scenes.push(scene.to_string());
            log.busy_during_generation.push(self.state.is_busy());
            if self.fail {
                Err(VoiceError::EmptyReply)
            } else {
                Ok(format!("thinking about {scene}"))
            }
        }
    }

    struct StubSynthesizer {
        log: Arc<Mutex<Log>>,
        state: Arc<SharedState>,
        fail: bool,
    }

    impl SpeechSynthesizer for StubSynthesizer {
        fn synthesize(&self, text: &str) -> Result<Speech, VoiceError> {
            let mut log = self.log.lock().unwrap();
            log.spoken.push(text.to_string());
            log.busy_during_synthesis.push(self.state.is_busy());
            if self.fail {
                return Err(VoiceError::EmptyAudio);
            }
            Ok(Speech {
                samples: vec![0.0, 0.25, -0.25],
                sample_rate: 16_000,
            })
        }
    }

    fn harness(
        generator_fails: bool,
        synthesis_fails: bool,
    ) -> (Arc<SharedState>, Arc<Mutex<Log>>, Narrator) {
        let state = Arc::new(SharedState::new());
        let log = Arc::new(Mutex::new(Log::default()));
        let narrator = Narrator::new(
            state.clone(),
            Box::new(StubGenerator {
                log: log.clone(),
                state: state.clone(),
                fail: generator_fails,
            }),
            Box::new(StubSynthesizer {
                log: log.clone(),
                state: state.clone(),
                fail: synthesis_fails,
            }),
            INTERVAL,
            COOLDOWN,
        );
        (state, log, narrator)
    }

    fn set_front(state: &SharedState, labels: &[&str]) {
        let boxes = labels
            .iter()
            .map(|label| BoundingBox::new(0, 0, 4, 4, *label))
            .collect();
        assert!(state.publish_boxes_if_idle(Camera::Front, boxes));
    }

    #[test]
    fn empty_scene_is_silent() {
        let (state, log, mut narrator) = harness(false, false);
        assert_eq!(narrator.cycle(), INTERVAL);
        assert!(log.lock().unwrap().scenes.is_empty());
        assert_eq!(state.status().audio_id, 0);
    }

    #[test]
    fn speaks_and_publishes_caption_with_audio() {
        let (state, log, mut narrator) = harness(false, false);
        set_front(&state, &["dog"]);
        state.publish_boxes_if_idle(Camera::Rear, vec![BoundingBox::new(0, 0, 1, 1, "cup")]);

        assert_eq!(narrator.cycle(), COOLDOWN + INTERVAL);
        let log = log.lock().unwrap();
        assert_eq!(log.scenes, vec!["dog ahead and cup behind"]);
        assert_eq!(log.busy_during_generation, vec![true]);
        assert_eq!(log.busy_during_synthesis, vec![true]);

        let status = state.status();
        assert_eq!(status.caption, "Nemo: thinking about dog ahead and cup behind");
        assert_eq!(status.audio_id, 1);
        let clip = state.latest_audio().expect("audio published");
        assert_eq!(clip.version, 1);
        assert_eq!(&clip.wav[..4], b"RIFF");
        assert!(!state.is_busy());
    }

    #[test]
    fn same_objects_in_another_order_are_not_repeated() {
        let (state, log, mut narrator) = harness(false, false);
        set_front(&state, &["dog", "cat"]);
        narrator.cycle();

        set_front(&state, &["cat", "dog", "cat"]);
        assert_eq!(narrator.cycle(), INTERVAL);
        assert_eq!(log.lock().unwrap().spoken.len(), 1);

        set_front(&state, &["cat"]);
        narrator.cycle();
        assert_eq!(log.lock().unwrap().spoken.len(), 2);
        assert_eq!(state.status().audio_id, 2);
    }

    #[test]
    fn generator_failure_falls_back_to_plain_sentence() {
        let (state, log, mut narrator) = harness(true, false);
        set_front(&state, &["cat"]);
        narrator.cycle();

        assert_eq!(log.lock().unwrap().spoken, vec!["I see cat ahead."]);
        assert_eq!(state.status().caption, "Nemo: I see cat ahead.");
    }

    #[test]
    fn synthesis_failure_publishes_nothing_and_clears_busy() {
        let (state, log, mut narrator) = harness(false, true);
        set_front(&state, &["cat"]);

        assert_eq!(narrator.cycle(), COOLDOWN + INTERVAL);
        assert!(!state.is_busy());
        assert_eq!(state.status().caption, INITIAL_CAPTION);
        assert_eq!(state.status().audio_id, 0);
        assert!(state.latest_audio().is_none());

        // The failed scene is remembered and not retried.
        assert_eq!(narrator.cycle(), INTERVAL);
        assert_eq!(log.lock().unwrap().spoken.len(), 1);
    }
}
