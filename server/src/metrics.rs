// Metrics collection and tracking

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tts_core::{AudioOrigin, CacheDecision, CacheStats, SpokenAudio, SynthesisError};

/// Latency samples kept for percentile calculation
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Per-endpoint metrics
#[derive(Debug, Clone, Default)]
pub struct EndpointMetrics {
    request_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    total_latency_ms: Arc<AtomicU64>,
    max_latency_ms: Arc<AtomicU64>,
    latency_samples: Arc<Mutex<VecDeque<u64>>>,
}

impl EndpointMetrics {
    pub fn record(&self, latency_ms: u64, failed: bool) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            if samples.len() == MAX_LATENCY_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    fn percentile(&self, p: usize) -> u64 {
        let Ok(samples) = self.latency_samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() * p / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn snapshot(&self) -> EndpointStats {
        let request_count = self.request_count.load(Ordering::Relaxed);
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        EndpointStats {
            request_count,
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms: if request_count == 0 {
                0.0
            } else {
                total as f64 / request_count as f64
            },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
            p99_latency_ms: self.percentile(99),
        }
    }
}

/// Speech and cache counters
#[derive(Debug, Clone, Default)]
pub struct SpeechMetrics {
    cache_hits: Arc<AtomicU64>,
    cache_misses: Arc<AtomicU64>,
    cache_bypasses: Arc<AtomicU64>,
    cache_inserts: Arc<AtomicU64>,
    cache_refused: Arc<AtomicU64>,
    generations: Arc<AtomicU64>,
    total_generation_ms: Arc<AtomicU64>,
    provider_errors: Arc<AtomicU64>,
}

impl SpeechMetrics {
    pub fn record_spoken(&self, spoken: &SpokenAudio, elapsed_ms: u64) {
        let counter = match spoken.decision {
            CacheDecision::Hit => &self.cache_hits,
            CacheDecision::Stored => &self.cache_inserts,
            CacheDecision::Full => &self.cache_refused,
            CacheDecision::Disabled | CacheDecision::ExerciseScoped => &self.cache_bypasses,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        // Stored and Full both looked the key up first.
        if matches!(spoken.decision, CacheDecision::Stored | CacheDecision::Full) {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        if spoken.origin == AudioOrigin::Generated {
            self.generations.fetch_add(1, Ordering::Relaxed);
            self.total_generation_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, error: &SynthesisError) {
        if error.is_provider_failure() {
            self.provider_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> SpeechStats {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let generations = self.generations.load(Ordering::Relaxed);
        let total_generation_ms = self.total_generation_ms.load(Ordering::Relaxed);
        SpeechStats {
            cache_hits: hits,
            cache_misses: misses,
            cache_bypasses: self.cache_bypasses.load(Ordering::Relaxed),
            cache_inserts: self.cache_inserts.load(Ordering::Relaxed),
            cache_refused: self.cache_refused.load(Ordering::Relaxed),
            cache_hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64 * 100.0
            },
            generations,
            avg_generation_ms: if generations == 0 {
                0.0
            } else {
                total_generation_ms as f64 / generations as f64
            },
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppMetrics {
    pub tts: EndpointMetrics,
    pub speech: SpeechMetrics,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub tts: EndpointStats,
    pub speech: SpeechStats,
    pub cache: CacheSummary,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SpeechStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_bypasses: u64,
    pub cache_inserts: u64,
    pub cache_refused: u64,
    pub cache_hit_rate: f64,
    pub generations: u64,
    pub avg_generation_ms: f64,
    pub provider_errors: u64,
}

#[derive(Serialize)]
pub struct CacheSummary {
    pub entries: usize,
    pub max_entries: usize,
    pub total_bytes: usize,
}

impl CacheSummary {
    pub fn new(stats: &CacheStats, max_entries: usize) -> Self {
        Self {
            entries: stats.total_entries,
            max_entries,
            total_bytes: stats.total_bytes,
        }
    }
}
