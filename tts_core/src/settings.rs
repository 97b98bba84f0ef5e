use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::SynthesisError;

/// Audio container requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Mp3,
    Opus,
    Aac,
    Flac,
    Wav,
    Pcm,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Mp3 => "mp3",
            ResponseFormat::Opus => "opus",
            ResponseFormat::Aac => "aac",
            ResponseFormat::Flac => "flac",
            ResponseFormat::Wav => "wav",
            ResponseFormat::Pcm => "pcm",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseFormat::Mp3 => "audio/mpeg",
            ResponseFormat::Opus => "audio/opus",
            ResponseFormat::Aac => "audio/aac",
            ResponseFormat::Flac => "audio/flac",
            ResponseFormat::Wav => "audio/wav",
            ResponseFormat::Pcm => "audio/pcm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechSettings {
    pub model: String,
    pub voice: String,
    pub speed: f64,
    pub response_format: ResponseFormat,
    pub voice_style: String,
    pub custom_instructions: String,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
            response_format: ResponseFormat::Mp3,
            voice_style: "neutral".to_string(),
            custom_instructions: String::new(),
        }
    }
}

/// Which credential tier a tenant prefers, and which one a request used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeySource {
    User,
    #[default]
    System,
}

impl ApiKeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeySource::User => "user",
            ApiKeySource::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    pub api_key_source: ApiKeySource,
    #[serde(skip_serializing)]
    pub user_api_key: Option<String>,
    pub tts: SpeechSettings,
    pub cache_audio: bool,
}

impl UserSettings {
    pub fn with_defaults(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            api_key_source: ApiKeySource::System,
            user_api_key: None,
            tts: SpeechSettings::default(),
            cache_audio: true,
        }
    }

    fn user_key(&self) -> Option<&str> {
        non_blank(self.user_api_key.as_deref())
    }

    /// Pick the key a request should use: the preferred tier first, the
    /// other tier as fallback.
    pub fn effective_credential(&self, system_key: Option<&str>) -> Option<Credential> {
        let user = self.user_key().map(|key| Credential {
            key: key.to_string(),
            source: ApiKeySource::User,
        });
        let system = non_blank(system_key).map(|key| Credential {
            key: key.to_string(),
            source: ApiKeySource::System,
        });
        match self.api_key_source {
            ApiKeySource::User => user.or(system),
            ApiKeySource::System => system.or(user),
        }
    }

    pub fn api_key_info(&self, system_key: Option<&str>) -> ApiKeyInfo {
        ApiKeyInfo {
            preferred_source: self.api_key_source,
            effective_source: self.effective_credential(system_key).map(|c| c.source),
            has_user_key: self.user_key().is_some(),
            has_system_key: non_blank(system_key).is_some(),
        }
    }
}

fn non_blank(key: Option<&str>) -> Option<&str> {
    key.map(str::trim).filter(|k| !k.is_empty())
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub key: String,
    pub source: ApiKeySource,
}

// Keys never end up in logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("key", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

impl Credential {
    /// Basic format check done before any provider call.
    pub fn validate(&self) -> Result<(), SynthesisError> {
        if self.key.starts_with("sk-") {
            Ok(())
        } else {
            Err(SynthesisError::ConfigurationInvalid)
        }
    }
}

/// Credential diagnostics safe to hand back to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeyInfo {
    pub preferred_source: ApiKeySource,
    pub effective_source: Option<ApiKeySource>,
    pub has_user_key: bool,
    pub has_system_key: bool,
}

/// Resolve a tenant's key or fail with the matching configuration error.
pub fn resolve_credential(
    settings: &UserSettings,
    system_key: Option<&str>,
) -> Result<Credential, SynthesisError> {
    let credential = settings
        .effective_credential(system_key)
        .ok_or(SynthesisError::ConfigurationMissing)?;
    credential.validate()?;
    Ok(credential)
}

/// Spoken-style guidance for instruction-capable models.
pub fn voice_style_instructions(style: &str) -> &'static str {
    match style {
        "friendly" => "Speak in a warm, friendly and encouraging tone.",
        "professional" => "Speak in a clear, professional and composed tone.",
        "calm" => "Speak slowly and calmly, with a soothing tone.",
        "energetic" => "Speak with energy and enthusiasm, keeping a lively pace.",
        "teacher" => {
            "Speak like a patient language teacher: articulate every word clearly and pause briefly between phrases."
        }
        "storyteller" => "Speak like a storyteller, with expressive intonation.",
        _ => "Speak in a neutral, natural tone with clear pronunciation.",
    }
}

/// Per-tenant settings persistence, consumed by the speech service.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Settings for `user_id`, creating and saving defaults on first use.
    async fn load_or_create(&self, user_id: &str) -> Result<UserSettings, SynthesisError>;
}

/// Settings kept in process memory.
#[derive(Default)]
pub struct InMemorySettingsStore {
    settings: RwLock<HashMap<String, UserSettings>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save(&self, settings: UserSettings) {
        self.settings
            .write()
            .await
            .insert(settings.user_id.clone(), settings);
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn load_or_create(&self, user_id: &str) -> Result<UserSettings, SynthesisError> {
        if let Some(existing) = self.settings.read().await.get(user_id) {
            return Ok(existing.clone());
        }

        let mut settings = self.settings.write().await;
        let entry = settings.entry(user_id.to_string()).or_insert_with(|| {
            info!(user_id, "Creating default speech settings");
            UserSettings::with_defaults(user_id)
        });
        Ok(entry.clone())
    }
}
