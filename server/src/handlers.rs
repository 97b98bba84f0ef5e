use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderMap, HeaderName, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tts_core::service::{ModelCatalog, SettingsCheck};
use tts_core::store::round_div;
use tts_core::{AudioOrigin, EntrySummary, SpeechRequest, SpokenAudio};

use crate::error::ApiError;
use crate::metrics::{CacheSummary, MetricsResponse, SystemMetrics};
use crate::validation::{validate_tts_request, validate_user_id};
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
/// Directive handed to downstream HTTP caches for audio bodies.
const AUDIO_CACHE_CONTROL: &str = "public, max-age=86400";
const MB: usize = 1024 * 1024;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsRequest {
    #[serde(default)]
    text: String,
    timestamp: Option<i64>,
    session_id: Option<String>,
    card_id: Option<String>,
    exercise: Option<String>,
}

#[derive(Serialize)]
pub struct SettingsTestResponse {
    success: bool,
    message: String,
    #[serde(flatten)]
    check: SettingsCheck,
}

#[derive(Serialize)]
pub struct ModelsResponse {
    success: bool,
    message: String,
    #[serde(flatten)]
    catalog: ModelCatalog,
}

#[derive(Serialize)]
pub struct CacheStatsResponse {
    cache_statistics: CacheStatistics,
}

#[derive(Serialize)]
pub struct CacheStatistics {
    total_entries: usize,
    total_memory_mb: usize,
    total_memory_bytes: usize,
    largest_entries: Vec<EntrySummary>,
}

#[derive(Serialize)]
pub struct ClearCacheResponse {
    message: String,
    statistics: ClearStatistics,
}

#[derive(Serialize)]
pub struct ClearStatistics {
    cleared_entries: usize,
    memory_freed_mb: usize,
    memory_freed_bytes: usize,
}

fn user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(USER_ID_HEADER)
        .ok_or(ApiError::Unauthenticated)?
        .to_str()
        .map_err(|_| ApiError::InvalidInput("x-user-id must be visible ASCII".to_string()))?;
    validate_user_id(value)?;
    Ok(value.to_string())
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn tts_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TtsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    let result = match body {
        Ok(Json(req)) => speak(&state, &headers, req).await,
        Err(rejection) => Err(ApiError::from(rejection)),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    state.metrics.tts.record(elapsed_ms, result.is_err());
    match &result {
        Ok(spoken) => state.metrics.speech.record_spoken(spoken, elapsed_ms),
        Err(ApiError::Synthesis(e)) => state.metrics.speech.record_failure(e),
        Err(_) => {}
    }

    result.map(audio_response)
}

/// Empty identifiers count as absent.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

async fn speak(
    state: &AppState,
    headers: &HeaderMap,
    req: TtsRequest,
) -> Result<SpokenAudio, ApiError> {
    let user_id = user_id(headers)?;
    let session_id = non_empty(req.session_id);
    let card_id = non_empty(req.card_id);
    let exercise = non_empty(req.exercise);
    validate_tts_request(
        &req.text,
        session_id.as_deref(),
        card_id.as_deref(),
        exercise.as_deref(),
    )?;

    let request = SpeechRequest {
        text: req.text,
        timestamp: req.timestamp,
        session_id,
        card_id,
        exercise,
    };
    Ok(state.speech.speak(&user_id, &request).await?)
}

fn insert_text(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Raw audio body plus the headers describing where it came from.
fn audio_response(spoken: SpokenAudio) -> Response {
    let mut response = (StatusCode::OK, Body::from(spoken.audio.to_vec())).into_response();
    let headers = response.headers_mut();

    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(spoken.response_format.content_type()),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(spoken.audio.len()));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(AUDIO_CACHE_CONTROL));
    headers.insert(
        HeaderName::from_static("x-audio-source"),
        HeaderValue::from_static(spoken.origin.as_str()),
    );
    headers.insert(
        HeaderName::from_static("x-api-key-source"),
        HeaderValue::from_static(spoken.key_source.as_str()),
    );
    insert_text(headers, "x-session-id", &spoken.session_id);
    insert_text(headers, "x-exercise", &spoken.exercise);
    if spoken.origin == AudioOrigin::Generated {
        insert_text(headers, "x-tts-model", &spoken.model);
        insert_text(headers, "x-tts-voice", &spoken.voice);
    }

    response
}

pub async fn test_settings_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SettingsTestResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    let check = state.speech.test_current_settings(&user_id).await?;

    let tier = match check.api_key_info.effective_source {
        Some(source) => source.as_str(),
        None => "no",
    };
    Ok(Json(SettingsTestResponse {
        success: true,
        message: format!("TTS works with the current settings (using the {tier} API key)"),
        check,
    }))
}

pub async fn models_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ModelsResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    let catalog = state.speech.available_models(&user_id).await?;
    Ok(Json(ModelsResponse {
        success: true,
        message: "Models retrieved successfully".to_string(),
        catalog,
    }))
}

pub async fn cache_stats_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CacheStatsResponse>, ApiError> {
    user_id(&headers)?;
    let stats = state.speech.cache_stats();
    Ok(Json(CacheStatsResponse {
        cache_statistics: CacheStatistics {
            total_entries: stats.total_entries,
            total_memory_mb: round_div(stats.total_bytes, MB),
            total_memory_bytes: stats.total_bytes,
            largest_entries: stats.largest_entries,
        },
    }))
}

pub async fn clear_cache_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClearCacheResponse>, ApiError> {
    user_id(&headers)?;
    let report = state.speech.clear_cache();
    Ok(Json(ClearCacheResponse {
        message: "Audio cache cleared".to_string(),
        statistics: ClearStatistics {
            cleared_entries: report.cleared_entries,
            memory_freed_mb: round_div(report.freed_bytes, MB),
            memory_freed_bytes: report.freed_bytes,
        },
    }))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    // Unix-like systems only
    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|loadavg| {
                    loadavg
                        .split_whitespace()
                        .next()
                        .and_then(|s| s.parse::<f64>().ok())
                })
        }
        #[cfg(not(unix))]
        None
    };

    let cache = state.speech.cache();
    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        system: SystemMetrics {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            request_count: state.request_count.load(Ordering::Relaxed),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            system_load,
        },
        tts: state.metrics.tts.snapshot(),
        speech: state.metrics.speech.snapshot(),
        cache: CacheSummary::new(&cache.stats(), cache.max_entries()),
    })
}
