//! Request-level orchestration around the audio cache.
//!
//! `SpeechService` resolves a tenant's settings and credential, fingerprints
//! the request, serves cache hits and otherwise calls the provider, offering
//! the result back to the cache when the policy allows it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SynthesisError;
use crate::fingerprint::{fingerprint, CacheKey, FingerprintInput, NO_SESSION};
use crate::policy::{CacheDecision, CachePolicy, ExerciseTag};
use crate::provider::{SpeechSynthesizer, SynthesisParams};
use crate::settings::{
    resolve_credential, ApiKeyInfo, ApiKeySource, Credential, ResponseFormat, SettingsStore,
};
use crate::store::{AudioCache, CacheStats, ClearReport};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);
/// Phrase synthesized by the settings check.
pub const TEST_PHRASE: &str = "Test TTS functionality";
/// Model ids listed in full by the model catalog.
const MODELS_SHOWN: usize = 10;

/// One synthesis request as received from a client.
#[derive(Debug, Clone, Default)]
pub struct SpeechRequest {
    pub text: String,
    /// Unix milliseconds. Defaults to now, which makes the request unique.
    pub timestamp: Option<i64>,
    pub session_id: Option<String>,
    pub card_id: Option<String>,
    pub exercise: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioOrigin {
    Cache,
    Generated,
}

impl AudioOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioOrigin::Cache => "cache",
            AudioOrigin::Generated => "generated",
        }
    }
}

/// Audio ready to hand back, with the context the HTTP layer echoes.
#[derive(Debug, Clone)]
pub struct SpokenAudio {
    pub audio: Arc<[u8]>,
    pub origin: AudioOrigin,
    pub decision: CacheDecision,
    pub key_source: ApiKeySource,
    pub model: String,
    pub voice: String,
    pub response_format: ResponseFormat,
    pub session_id: String,
    pub exercise: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsCheck {
    pub audio_size: usize,
    pub settings_used: SynthesisParams,
    pub api_key_info: ApiKeyInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCatalog {
    pub total_models: usize,
    pub tts_models: Vec<String>,
    pub all_models: Vec<String>,
    pub api_key_info: ApiKeyInfo,
}

pub struct SpeechService {
    cache: Arc<AudioCache>,
    settings: Arc<dyn SettingsStore>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    system_key: Option<String>,
    provider_timeout: Duration,
}

impl SpeechService {
    pub fn new(
        cache: Arc<AudioCache>,
        settings: Arc<dyn SettingsStore>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            cache,
            settings,
            synthesizer,
            system_key: None,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Credential used when a tenant has no key of their own.
    pub fn with_system_key(mut self, key: Option<String>) -> Self {
        self.system_key = key;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<AudioCache> {
        &self.cache
    }

    pub async fn speak(
        &self,
        user_id: &str,
        request: &SpeechRequest,
    ) -> Result<SpokenAudio, SynthesisError> {
        info!(
            user_id,
            session = request.session_id.as_deref().unwrap_or(NO_SESSION),
            card = ?request.card_id,
            exercise = ?request.exercise,
            chars = request.text.chars().count(),
            "Speech request"
        );

        let settings = self.settings.load_or_create(user_id).await?;
        let credential = resolve_credential(&settings, self.system_key.as_deref())?;
        let tts = &settings.tts;

        let key = fingerprint(&FingerprintInput {
            text: &request.text,
            model: &tts.model,
            voice: &tts.voice,
            speed: tts.speed,
            voice_style: &tts.voice_style,
            custom_instructions: &tts.custom_instructions,
            session_id: request.session_id.as_deref(),
            card_id: request.card_id.as_deref(),
            exercise: request.exercise.as_deref(),
            timestamp: request
                .timestamp
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
            user_id,
        });
        debug!(key = %key, "Speech fingerprint");

        let tag = ExerciseTag::from_request(request.exercise.as_deref());
        let spoken = |audio: Arc<[u8]>, origin, decision| SpokenAudio {
            audio,
            origin,
            decision,
            key_source: credential.source,
            model: tts.model.clone(),
            voice: tts.voice.clone(),
            response_format: tts.response_format,
            session_id: request
                .session_id
                .clone()
                .unwrap_or_else(|| NO_SESSION.to_string()),
            exercise: tag.as_str().to_string(),
        };

        if CachePolicy::may_read(settings.cache_audio, &tag) {
            if let Some(audio) = self.cache.lookup(&key) {
                info!(key = %key, bytes = audio.len(), "Serving cached audio");
                return Ok(spoken(audio, AudioOrigin::Cache, CacheDecision::Hit));
            }
        }

        info!(
            source = credential.source.as_str(),
            model = %tts.model,
            voice = %tts.voice,
            speed = tts.speed,
            "Generating speech"
        );
        let params = SynthesisParams::from_settings(&request.text, tts);
        let audio: Arc<[u8]> = self.call_synthesizer(&credential, &params).await?.into();

        let decision = self.offer_to_cache(&key, &audio, settings.cache_audio, &tag);
        Ok(spoken(audio, AudioOrigin::Generated, decision))
    }

    fn offer_to_cache(
        &self,
        key: &CacheKey,
        audio: &Arc<[u8]>,
        cache_enabled: bool,
        tag: &ExerciseTag,
    ) -> CacheDecision {
        if let Some(reason) = CachePolicy::bypass_reason(cache_enabled, tag) {
            if reason == CacheDecision::ExerciseScoped {
                debug!(exercise = tag.as_str(), "Not caching exercise audio");
            }
            return reason;
        }

        let stored = CachePolicy::may_write(cache_enabled, !self.cache.is_full(), tag)
            && self.cache.insert(key.clone(), audio.clone());
        if stored {
            info!(key = %key, entries = self.cache.len(), "Audio cached");
            CacheDecision::Stored
        } else {
            debug!(key = %key, max = self.cache.max_entries(), "Audio cache full, not caching");
            CacheDecision::Full
        }
    }

    /// Synthesize the fixed test phrase with the tenant's current settings.
    /// Never touches the cache.
    pub async fn test_current_settings(
        &self,
        user_id: &str,
    ) -> Result<SettingsCheck, SynthesisError> {
        let settings = self.settings.load_or_create(user_id).await?;
        let credential = resolve_credential(&settings, self.system_key.as_deref())?;
        let params = SynthesisParams::from_settings(TEST_PHRASE, &settings.tts);

        let audio = self.call_synthesizer(&credential, &params).await?;
        info!(user_id, bytes = audio.len(), "Speech settings test succeeded");

        Ok(SettingsCheck {
            audio_size: audio.len(),
            settings_used: params,
            api_key_info: settings.api_key_info(self.system_key.as_deref()),
        })
    }

    pub async fn available_models(&self, user_id: &str) -> Result<ModelCatalog, SynthesisError> {
        let settings = self.settings.load_or_create(user_id).await?;
        let credential = resolve_credential(&settings, self.system_key.as_deref())?;

        let models = self
            .bounded(self.synthesizer.list_models(&credential.key))
            .await?;
        let tts_models = models
            .iter()
            .filter(|id| id.contains("tts") || id.contains("speech"))
            .cloned()
            .collect();

        Ok(ModelCatalog {
            total_models: models.len(),
            tts_models,
            all_models: models.iter().take(MODELS_SHOWN).cloned().collect(),
            api_key_info: settings.api_key_info(self.system_key.as_deref()),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) -> ClearReport {
        let report = self.cache.clear();
        info!(
            entries = report.cleared_entries,
            bytes = report.freed_bytes,
            "Audio cache cleared"
        );
        report
    }

    async fn call_synthesizer(
        &self,
        credential: &Credential,
        params: &SynthesisParams,
    ) -> Result<Vec<u8>, SynthesisError> {
        let result = self
            .bounded(self.synthesizer.synthesize(&credential.key, params))
            .await;
        if let Err(e) = &result {
            warn!(kind = e.kind(), error = %e, "Speech provider call failed");
        }
        result
    }

    // No cancellation reaches the provider: on timeout we only stop waiting.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, SynthesisError>>,
    ) -> Result<T, SynthesisError> {
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SynthesisError::NetworkUnavailable(format!(
                "provider did not respond within {}s",
                self.provider_timeout.as_secs_f32()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{InMemorySettingsStore, UserSettings};
    use crate::store::DEFAULT_MAX_ENTRIES;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SYSTEM_KEY: &str = "sk-system-test";

    #[derive(Default)]
    struct ScriptedSynth {
        calls: AtomicUsize,
        failure: Option<SynthesisError>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SpeechSynthesizer for ScriptedSynth {
        async fn synthesize(
            &self,
            _api_key: &str,
            params: &SynthesisParams,
        ) -> Result<Vec<u8>, SynthesisError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.failure {
                Some(e) => Err(e.clone()),
                None => {
                    let audio = format!("{}:{}:{}#{n}", params.model, params.voice, params.input);
                    Ok(audio.into_bytes())
                }
            }
        }

        async fn list_models(&self, _api_key: &str) -> Result<Vec<String>, SynthesisError> {
            let mut models: Vec<String> = (0..12).map(|i| format!("gpt-{i}")).collect();
            models.push("tts-1".to_string());
            models.push("gpt-4o-mini-tts".to_string());
            models.push("speech-preview".to_string());
            Ok(models)
        }
    }

    struct Fixture {
        service: SpeechService,
        synth: Arc<ScriptedSynth>,
        settings: Arc<InMemorySettingsStore>,
    }

    fn fixture_with(synth: ScriptedSynth, max_entries: usize) -> Fixture {
        let synth = Arc::new(synth);
        let settings = Arc::new(InMemorySettingsStore::new());
        let service = SpeechService::new(
            Arc::new(AudioCache::new(max_entries)),
            settings.clone(),
            synth.clone(),
        )
        .with_system_key(Some(SYSTEM_KEY.to_string()));
        Fixture {
            service,
            synth,
            settings,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ScriptedSynth::default(), DEFAULT_MAX_ENTRIES)
    }

    fn request(text: &str, exercise: Option<&str>) -> SpeechRequest {
        SpeechRequest {
            text: text.to_string(),
            timestamp: Some(42),
            session_id: Some("s-1".to_string()),
            card_id: Some("c-1".to_string()),
            exercise: exercise.map(str::to_string),
        }
    }

    impl Fixture {
        fn calls(&self) -> usize {
            self.synth.calls.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit_returns_identical_bytes() {
        let fx = fixture();
        let first = fx.service.speak("u1", &request("Hallo", None)).await.unwrap();
        assert_eq!(first.origin, AudioOrigin::Generated);
        assert_eq!(first.decision, CacheDecision::Stored);
        assert_eq!(first.key_source, ApiKeySource::System);

        let second = fx.service.speak("u1", &request("  hallo ", None)).await.unwrap();
        assert_eq!(second.origin, AudioOrigin::Cache);
        assert_eq!(second.decision, CacheDecision::Hit);
        assert_eq!(second.audio, first.audio);
        assert_eq!(fx.calls(), 1);
        assert_eq!(fx.service.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_timestamp_defeats_cache() {
        let fx = fixture();
        let mut req = request("Hallo", None);
        fx.service.speak("u1", &req).await.unwrap();
        req.timestamp = Some(43);
        let again = fx.service.speak("u1", &req).await.unwrap();
        assert_eq!(again.origin, AudioOrigin::Generated);
        assert_eq!(fx.calls(), 2);
        assert_eq!(fx.service.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_caching_disabled_never_inserts() {
        let fx = fixture();
        let mut settings = UserSettings::with_defaults("u1");
        settings.cache_audio = false;
        fx.settings.save(settings).await;

        for exercise in [None, Some("general"), Some("vocabulary-drill")] {
            let spoken = fx.service.speak("u1", &request("Hallo", exercise)).await.unwrap();
            assert_eq!(spoken.origin, AudioOrigin::Generated);
            assert_eq!(spoken.decision, CacheDecision::Disabled);
        }
        assert!(fx.service.cache().is_empty());
        assert_eq!(fx.calls(), 3);
    }

    #[tokio::test]
    async fn test_exercise_requests_bypass_cache() {
        let fx = fixture();
        for _ in 0..2 {
            let spoken = fx
                .service
                .speak("u1", &request("Hallo", Some("vocabulary-drill")))
                .await
                .unwrap();
            assert_eq!(spoken.origin, AudioOrigin::Generated);
            assert_eq!(spoken.decision, CacheDecision::ExerciseScoped);
            assert_eq!(spoken.exercise, "vocabulary-drill");
        }
        assert!(fx.service.cache().is_empty());
        assert_eq!(fx.calls(), 2);
    }

    #[tokio::test]
    async fn test_general_and_exercise_are_independent() {
        let fx = fixture();
        fx.service.speak("u1", &request("Hallo", Some("general"))).await.unwrap();
        let quiz = fx
            .service
            .speak("u1", &request("Hallo", Some("quiz-123")))
            .await
            .unwrap();
        assert_eq!(quiz.origin, AudioOrigin::Generated);

        let general = fx
            .service
            .speak("u1", &request("Hallo", Some("general")))
            .await
            .unwrap();
        assert_eq!(general.origin, AudioOrigin::Cache);
        assert_eq!(general.exercise, "general");
        assert_eq!(fx.service.cache().len(), 1);
        assert_eq!(fx.calls(), 2);
    }

    #[tokio::test]
    async fn test_full_cache_keeps_serving_but_stops_storing() {
        let fx = fixture_with(ScriptedSynth::default(), 2);
        fx.service.speak("u1", &request("eins", None)).await.unwrap();
        fx.service.speak("u1", &request("zwei", None)).await.unwrap();

        let third = fx.service.speak("u1", &request("drei", None)).await.unwrap();
        assert_eq!(third.decision, CacheDecision::Full);
        assert_eq!(fx.service.cache().len(), 2);

        let first_again = fx.service.speak("u1", &request("eins", None)).await.unwrap();
        assert_eq!(first_again.origin, AudioOrigin::Cache);
    }

    #[tokio::test]
    async fn test_provider_failure_inserts_nothing() {
        let fx = fixture_with(
            ScriptedSynth {
                failure: Some(SynthesisError::ProviderRateLimited("slow down".into())),
                ..Default::default()
            },
            DEFAULT_MAX_ENTRIES,
        );
        let err = fx.service.speak("u1", &request("Hallo", None)).await.unwrap_err();
        assert!(matches!(err, SynthesisError::ProviderRateLimited(_)));
        assert!(fx.service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_provider_timeout_is_network_error() {
        let fx = fixture_with(
            ScriptedSynth {
                delay: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            DEFAULT_MAX_ENTRIES,
        );
        let service = fx.service.with_provider_timeout(Duration::from_millis(20));
        let err = service.speak("u1", &request("Hallo", None)).await.unwrap_err();
        assert!(matches!(err, SynthesisError::NetworkUnavailable(_)));
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_credential_errors_skip_provider() {
        let synth = Arc::new(ScriptedSynth::default());
        let settings = Arc::new(InMemorySettingsStore::new());
        let cache = Arc::new(AudioCache::default());

        let missing = SpeechService::new(cache.clone(), settings.clone(), synth.clone());
        assert_eq!(
            missing.speak("u1", &request("Hallo", None)).await.unwrap_err(),
            SynthesisError::ConfigurationMissing
        );

        let invalid = SpeechService::new(cache.clone(), settings, synth.clone())
            .with_system_key(Some("pk-wrong".to_string()));
        assert_eq!(
            invalid.speak("u1", &request("Hallo", None)).await.unwrap_err(),
            SynthesisError::ConfigurationInvalid
        );

        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_tenants_do_not_share_entries() {
        let fx = fixture();
        fx.service.speak("u1", &request("Hallo", None)).await.unwrap();
        let other = fx.service.speak("u2", &request("Hallo", None)).await.unwrap();
        assert_eq!(other.origin, AudioOrigin::Generated);
        assert_eq!(fx.service.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_settings_check_never_caches() {
        let fx = fixture();
        let check = fx.service.test_current_settings("u1").await.unwrap();
        assert_eq!(check.settings_used.input, TEST_PHRASE);
        assert!(check.audio_size > 0);
        assert_eq!(check.api_key_info.effective_source, Some(ApiKeySource::System));
        assert!(fx.service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_model_catalog() {
        let fx = fixture();
        let catalog = fx.service.available_models("u1").await.unwrap();
        assert_eq!(catalog.total_models, 15);
        assert_eq!(catalog.all_models.len(), MODELS_SHOWN);
        assert_eq!(
            catalog.tts_models,
            vec!["tts-1", "gpt-4o-mini-tts", "speech-preview"]
        );
    }

    #[tokio::test]
    async fn test_clear_cache_reports_freed_bytes() {
        let fx = fixture();
        fx.service.speak("u1", &request("eins", None)).await.unwrap();
        fx.service.speak("u1", &request("zwei", None)).await.unwrap();
        let before = fx.service.cache_stats();

        let report = fx.service.clear_cache();
        assert_eq!(report.cleared_entries, 2);
        assert_eq!(report.freed_bytes, before.total_bytes);
        assert_eq!(fx.service.cache_stats().total_entries, 0);

        let again = fx.service.speak("u1", &request("eins", None)).await.unwrap();
        assert_eq!(again.origin, AudioOrigin::Generated);
    }
}
