use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{ThoughtGenerator, VoiceError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    /// Negative keeps the model resident between utterances.
    keep_alive: i64,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Generator backed by an Ollama server's `/api/generate` endpoint.
pub struct OllamaGenerator {
    client: Client,
    url: String,
    model: String,
    max_words: usize,
}

impl OllamaGenerator {
    pub fn new(url: &str, model: &str, max_words: usize) -> Result<Self, VoiceError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_words,
        })
    }
}

impl ThoughtGenerator for OllamaGenerator {
    fn generate(&self, scene: &str) -> Result<String, VoiceError> {
        let started = std::time::Instant::now();
        let reply: GenerateResponse = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&GenerateRequest {
                model: &self.model,
                prompt: prompt_for(scene),
                stream: false,
                keep_alive: -1,
            })
            .send()?
            .error_for_status()?
            .json()?;

        let thought = shorten(&reply.response, self.max_words);
        if thought.is_empty() {
            return Err(VoiceError::EmptyReply);
        }
        info!("llm think: {:.2}s", started.elapsed().as_secs_f32());
        Ok(thought)
    }
}

pub fn prompt_for(scene: &str) -> String {
    format!("You are Nemo. You see: {scene}. Describe it in exactly 5 words.")
}

/// Trim a model reply and keep at most `max_words` whitespace-separated words.
pub fn shorten(reply: &str, max_words: usize) -> String {
    reply
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_scene() {
        assert_eq!(
            prompt_for("cat ahead"),
            "You are Nemo. You see: cat ahead. Describe it in exactly 5 words."
        );
    }

    #[test]
    fn shorten_trims_and_caps_words() {
        assert_eq!(shorten("  A cat sits there.\n", 12), "A cat sits there.");
        let long = "one two three four five six seven eight nine ten eleven twelve thirteen";
        assert_eq!(shorten(long, 12).split(' ').count(), 12);
        assert_eq!(shorten("   ", 12), "");
    }

    #[test]
    fn request_serializes_ollama_fields() {
        let body = serde_json::to_value(GenerateRequest {
            model: "qwen2.5:0.5b",
            prompt: prompt_for("dog behind"),
            stream: false,
            keep_alive: -1,
        })
        .expect("serializes");
        assert_eq!(body["model"], "qwen2.5:0.5b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["keep_alive"], -1);
    }
}
