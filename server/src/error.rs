use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::SynthesisError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing user identity")]
    Unauthenticated,

    #[error("Malformed request body: {0}")]
    MalformedBody(#[from] JsonRejection),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'static str>,
    code: u16,
}

fn synthesis_status(e: &SynthesisError) -> StatusCode {
    match e {
        SynthesisError::ConfigurationMissing | SynthesisError::ConfigurationInvalid => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        SynthesisError::ProviderAuth(_) => StatusCode::UNAUTHORIZED,
        SynthesisError::ProviderRateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        SynthesisError::ProviderQuotaExceeded(_) => StatusCode::PAYMENT_REQUIRED,
        SynthesisError::ProviderBadRequest(_) => StatusCode::BAD_REQUEST,
        SynthesisError::NetworkUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SynthesisError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn synthesis_message(e: &SynthesisError) -> &'static str {
    match e {
        SynthesisError::ConfigurationMissing => "No speech provider API key available",
        SynthesisError::ConfigurationInvalid => "Invalid speech provider API key format",
        SynthesisError::ProviderAuth(_) => "Invalid speech provider API key",
        SynthesisError::ProviderRateLimited(_) => "Speech provider rate limit exceeded",
        SynthesisError::ProviderQuotaExceeded(_) => "Speech provider quota exceeded",
        SynthesisError::ProviderBadRequest(_) => "Invalid request to speech provider",
        SynthesisError::NetworkUnavailable(_) => "Cannot connect to speech provider",
        SynthesisError::Internal(_) => "Error generating speech",
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::MalformedBody(rejection) => rejection.status(),
            ApiError::Synthesis(e) => synthesis_status(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::InvalidInput(msg) => ErrorResponse {
                error: "invalid_input",
                message: msg.clone(),
                details: msg.clone(),
                action: None,
                code: status.as_u16(),
            },
            ApiError::Unauthenticated => ErrorResponse {
                error: "unauthenticated",
                message: self.to_string(),
                details: "Requests must carry an x-user-id header".to_string(),
                action: None,
                code: status.as_u16(),
            },
            ApiError::MalformedBody(rejection) => ErrorResponse {
                error: "invalid_input",
                message: "Malformed request body".to_string(),
                details: rejection.body_text(),
                action: None,
                code: status.as_u16(),
            },
            ApiError::Synthesis(e) => {
                if matches!(e, SynthesisError::Internal(_)) {
                    tracing::error!("Speech error: {}", e);
                }
                let details = match e {
                    // Internal failures keep their detail out of client responses.
                    SynthesisError::Internal(_) => {
                        "Internal server error occurred while generating speech".to_string()
                    }
                    _ => e.to_string(),
                };
                ErrorResponse {
                    error: e.kind(),
                    message: synthesis_message(e).to_string(),
                    details,
                    action: e.action(),
                    code: status.as_u16(),
                }
            }
        };

        (status, Json(body)).into_response()
    }
}
