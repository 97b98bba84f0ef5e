//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, Response},
    Router,
};
use server::config::ServerConfig;
use server::{router, AppState};
use tower::ServiceExt;
use tts_core::{
    AudioCache, InMemorySettingsStore, SpeechService, SpeechSynthesizer, SynthesisError,
    SynthesisParams, UserSettings,
};

pub const SYSTEM_KEY: &str = "sk-system-test-key";
pub const USER: &str = "user-1";

/// Synthesizer double: every call returns fresh bytes, or the scripted error.
#[derive(Default)]
pub struct FakeSynthesizer {
    pub calls: AtomicUsize,
    pub failure: Mutex<Option<SynthesisError>>,
    pub keys_seen: Mutex<Vec<String>>,
    pub last_params: Mutex<Option<SynthesisParams>>,
}

impl FakeSynthesizer {
    pub fn failing(error: SynthesisError) -> Self {
        let fake = Self::default();
        *fake.failure.lock().unwrap() = Some(error);
        fake
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        api_key: &str,
        params: &SynthesisParams,
    ) -> Result<Vec<u8>, SynthesisError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys_seen.lock().unwrap().push(api_key.to_string());
        *self.last_params.lock().unwrap() = Some(params.clone());
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(format!("audio-{n}:{}", params.input).into_bytes())
    }

    async fn list_models(&self, _api_key: &str) -> Result<Vec<String>, SynthesisError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok((0..12)
            .map(|i| format!("gpt-model-{i}"))
            .chain(["tts-1".to_string(), "tts-1-hd".to_string()])
            .collect())
    }
}

pub struct TestApp {
    pub router: Router,
    pub synth: Arc<FakeSynthesizer>,
    pub settings: Arc<InMemorySettingsStore>,
    pub cache: Arc<AudioCache>,
}

pub struct TestAppBuilder {
    synth: FakeSynthesizer,
    system_key: Option<String>,
    max_entries: usize,
}

impl TestAppBuilder {
    pub fn synthesizer(mut self, synth: FakeSynthesizer) -> Self {
        self.synth = synth;
        self
    }

    pub fn system_key(mut self, key: Option<&str>) -> Self {
        self.system_key = key.map(str::to_string);
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn build(self) -> TestApp {
        let synth = Arc::new(self.synth);
        let settings = Arc::new(InMemorySettingsStore::new());
        let cache = Arc::new(AudioCache::new(self.max_entries));
        let speech = SpeechService::new(cache.clone(), settings.clone(), synth.clone())
            .with_system_key(self.system_key);
        let config = ServerConfig {
            audio_cache_max_entries: self.max_entries,
            ..ServerConfig::default()
        };

        TestApp {
            router: router(AppState::new(speech, config)),
            synth,
            settings,
            cache,
        }
    }
}

pub fn test_app() -> TestAppBuilder {
    TestAppBuilder {
        synth: FakeSynthesizer::default(),
        system_key: Some(SYSTEM_KEY.to_string()),
        max_entries: 100,
    }
}

/// Create a test app instance
pub fn create_test_app() -> TestApp {
    test_app().build()
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn save_settings(&self, settings: UserSettings) {
        self.settings.save(settings).await;
    }
}

pub fn tts_request(user: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/tts")
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn get_request(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn request(method: &str, uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
