use thiserror::Error;

/// Failures surfaced by a speech request.
///
/// None of these leave anything behind in the audio cache: a request only
/// inserts after the provider returned audio.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("No speech provider API key available")]
    ConfigurationMissing,

    #[error("Invalid speech provider API key format")]
    ConfigurationInvalid,

    #[error("Provider rejected the API key: {0}")]
    ProviderAuth(String),

    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimited(String),

    #[error("Provider quota exceeded: {0}")]
    ProviderQuotaExceeded(String),

    #[error("Provider rejected the request: {0}")]
    ProviderBadRequest(String),

    #[error("Cannot reach speech provider: {0}")]
    NetworkUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SynthesisError {
    /// Stable identifier used in error response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SynthesisError::ConfigurationMissing => "configuration_missing",
            SynthesisError::ConfigurationInvalid => "configuration_invalid",
            SynthesisError::ProviderAuth(_) => "provider_auth",
            SynthesisError::ProviderRateLimited(_) => "provider_rate_limited",
            SynthesisError::ProviderQuotaExceeded(_) => "provider_quota_exceeded",
            SynthesisError::ProviderBadRequest(_) => "provider_bad_request",
            SynthesisError::NetworkUnavailable(_) => "network_unavailable",
            SynthesisError::Internal(_) => "internal",
        }
    }

    /// What the caller should do next, if there is anything useful to say.
    pub fn action(&self) -> Option<&'static str> {
        match self {
            SynthesisError::ConfigurationMissing | SynthesisError::ConfigurationInvalid => {
                Some("Configure an API key in Settings")
            }
            SynthesisError::ProviderAuth(_) => Some("Check your API key in Settings"),
            SynthesisError::ProviderRateLimited(_) => Some("Please try again later"),
            SynthesisError::ProviderQuotaExceeded(_) => Some("Please check your provider billing"),
            SynthesisError::ProviderBadRequest(_) => Some("Check your TTS settings"),
            SynthesisError::NetworkUnavailable(_) => Some("Check your internet connection"),
            SynthesisError::Internal(_) => None,
        }
    }

    /// Only provider and network failures come from the upstream call itself.
    pub fn is_provider_failure(&self) -> bool {
        !matches!(
            self,
            SynthesisError::ConfigurationMissing | SynthesisError::ConfigurationInvalid
        )
    }
}

/// Map an upstream failure onto the taxonomy.
///
/// Checks run in a fixed order: authentication, rate limiting, quota, bad
/// request. The message is consulted as well as the status because the
/// provider does not always pick the most specific status code.
pub fn classify_provider_failure(status: Option<u16>, message: &str) -> SynthesisError {
    let detail = message.to_string();
    let lower = message.to_lowercase();

    if status == Some(401) || message.contains("Incorrect API key") {
        SynthesisError::ProviderAuth(detail)
    } else if status == Some(429) || lower.contains("rate limit") {
        SynthesisError::ProviderRateLimited(detail)
    } else if status == Some(402) || lower.contains("quota") {
        SynthesisError::ProviderQuotaExceeded(detail)
    } else if status == Some(400) {
        SynthesisError::ProviderBadRequest(detail)
    } else {
        SynthesisError::Internal(match status {
            Some(code) => format!("provider returned {code}: {detail}"),
            None => detail,
        })
    }
}
