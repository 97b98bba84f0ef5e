use async_trait::async_trait;
use serde::Serialize;

use crate::error::SynthesisError;
use crate::settings::{voice_style_instructions, ResponseFormat, SpeechSettings};

/// Longest input sent to the provider, in characters.
pub const MAX_INPUT_CHARS: usize = 4096;
pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 4.0;
/// The only model that accepts free-form speaking instructions.
pub const INSTRUCTION_MODEL: &str = "gpt-4o-mini-tts";

/// Parameters of one provider synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisParams {
    pub model: String,
    pub voice: String,
    pub input: String,
    pub response_format: ResponseFormat,
    pub speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl SynthesisParams {
    pub fn from_settings(text: &str, settings: &SpeechSettings) -> Self {
        let instructions = (settings.model == INSTRUCTION_MODEL).then(|| {
            let mut instructions = voice_style_instructions(&settings.voice_style).to_string();
            if !settings.custom_instructions.is_empty() {
                instructions.push_str("\n\nAdditional instructions: ");
                instructions.push_str(&settings.custom_instructions);
            }
            instructions
        });

        Self {
            model: settings.model.clone(),
            voice: settings.voice.clone(),
            input: truncate_chars(text, MAX_INPUT_CHARS),
            response_format: settings.response_format,
            speed: clamp_speed(settings.speed),
            instructions,
        }
    }
}

pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return 1.0;
    }
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// External text-to-speech backend.
///
/// Each call carries the credential resolved for the requesting tenant;
/// implementations keep no per-tenant state.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize audio, returning the encoded bytes untouched.
    async fn synthesize(
        &self,
        api_key: &str,
        params: &SynthesisParams,
    ) -> Result<Vec<u8>, SynthesisError>;

    /// Identifiers of the models visible to `api_key`.
    async fn list_models(&self, api_key: &str) -> Result<Vec<String>, SynthesisError>;
}
