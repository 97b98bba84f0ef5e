use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use tts_core::{classify_provider_failure, SpeechSynthesizer, SynthesisError, SynthesisParams};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Structure for the models listing response
#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Structure of an OpenAI error body
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Client for an OpenAI-compatible speech API.
///
/// The API key is passed per call, so one client serves every tenant.
pub struct OpenAiSpeechClient {
    client: Client,
    base_url: String,
}

impl OpenAiSpeechClient {
    pub fn new(base_url: &str) -> Result<Self, SynthesisError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SynthesisError::Internal(format!("http client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Turn a non-success response into a taxonomy error, using the provider's
/// own message when the body carries one.
async fn failure_from(response: reqwest::Response) -> SynthesisError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .unwrap_or(body);
    debug!(status, message = %message, "Speech provider returned an error");
    classify_provider_failure(Some(status), &message)
}

fn transport_error(e: reqwest::Error) -> SynthesisError {
    if e.is_connect() || e.is_timeout() {
        SynthesisError::NetworkUnavailable(e.to_string())
    } else {
        SynthesisError::Internal(format!("speech provider request failed: {e}"))
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechClient {
    async fn synthesize(
        &self,
        api_key: &str,
        params: &SynthesisParams,
    ) -> Result<Vec<u8>, SynthesisError> {
        let response = self
            .client
            .post(self.url("/v1/audio/speech"))
            .bearer_auth(api_key)
            .json(params)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(failure_from(response).await);
        }

        let audio = response.bytes().await.map_err(transport_error)?;
        Ok(audio.to_vec())
    }

    async fn list_models(&self, api_key: &str) -> Result<Vec<String>, SynthesisError> {
        let response = self
            .client
            .get(self.url("/v1/models"))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(failure_from(response).await);
        }

        let models = response
            .json::<ModelList>()
            .await
            .map_err(|e| SynthesisError::Internal(format!("unexpected models response: {e}")))?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}
