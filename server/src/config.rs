// Configuration for the server

use std::time::Duration;

use tts_core::DEFAULT_MAX_ENTRIES;

#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub provider_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub audio_cache_max_entries: usize,
    pub provider_base_url: String,
    pub system_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            rate_limit_per_minute: 60,
            request_timeout_secs: 60,
            provider_timeout_secs: 30,
            cors_allowed_origins: None,
            audio_cache_max_entries: DEFAULT_MAX_ENTRIES,
            provider_base_url: speech_provider::DEFAULT_BASE_URL.to_string(),
            system_api_key: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = env_non_empty("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Self {
            port: env_parse("PORT", defaults.port),
            rate_limit_per_minute: env_parse(
                "RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            ),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            provider_timeout_secs: env_parse(
                "PROVIDER_TIMEOUT_SECS",
                defaults.provider_timeout_secs,
            ),
            cors_allowed_origins,
            audio_cache_max_entries: env_parse(
                "AUDIO_CACHE_MAX_ENTRIES",
                defaults.audio_cache_max_entries,
            ),
            provider_base_url: env_non_empty("OPENAI_BASE_URL")
                .unwrap_or(defaults.provider_base_url),
            system_api_key: env_non_empty("OPENAI_API_KEY"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}
