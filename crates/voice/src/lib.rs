//! Narration collaborators: turning a scene description into a short spoken
//! thought ([`ThoughtGenerator`]) and the thought into audio ([`SpeechSynthesizer`]).

mod ollama;
mod synth;
mod wav;

pub use ollama::{OllamaGenerator, prompt_for, shorten};
pub use synth::CommandSynthesizer;
pub use wav::{decode_wav, encode_wav};

use thiserror::Error;

/// Mono float samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Speech {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("language model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("language model returned an empty reply")]
    EmptyReply,
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("synthesizer produced no samples")]
    EmptyAudio,
}

pub trait ThoughtGenerator: Send {
    fn generate(&self, scene: &str) -> Result<String, VoiceError>;
}

pub trait SpeechSynthesizer: Send {
    fn synthesize(&self, text: &str) -> Result<Speech, VoiceError>;
}
