use std::{
    io::{ErrorKind, Write},
    process::{Command, Stdio},
    time::Instant,
};

use tracing::info;

use crate::{Speech, SpeechSynthesizer, VoiceError, wav::decode_wav};

/// Synthesizer that pipes text into an external TTS program and reads a WAV
/// file back from its stdout (`espeak-ng --stdout`, `piper --output_file -`, ...).
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn synthesize(&self, text: &str) -> Result<Speech, VoiceError> {
        let started = Instant::now();
        let spawn_err = |source| VoiceError::Spawn {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits early closes the pipe; its exit status decides.
            if let Err(err) = stdin.write_all(text.as_bytes()) {
                if err.kind() != ErrorKind::BrokenPipe {
                    return Err(spawn_err(err));
                }
            }
        }
        let output = child.wait_with_output().map_err(spawn_err)?;
        if !output.status.success() {
            return Err(VoiceError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let speech = decode_wav(&output.stdout)?;
        info!("tts gen: {:.2}s", started.elapsed().as_secs_f32());
        Ok(speech)
    }
}
