//! Who may read from and write to the audio cache.
//!
//! Exercise flows ask for new sentence audio on every attempt, so anything
//! tagged with a specific exercise bypasses the cache in both directions.
//! The exercise tag is part of the fingerprint as well; this gate holds even
//! if two fingerprints ever matched.

use serde::Serialize;

use crate::fingerprint::GENERAL_EXERCISE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExerciseTag {
    General,
    Specific(String),
}

impl ExerciseTag {
    pub fn from_request(tag: Option<&str>) -> Self {
        match tag {
            None => ExerciseTag::General,
            Some(t) if t == GENERAL_EXERCISE => ExerciseTag::General,
            Some(t) => ExerciseTag::Specific(t.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ExerciseTag::General => GENERAL_EXERCISE,
            ExerciseTag::Specific(t) => t,
        }
    }

    pub fn is_general(&self) -> bool {
        matches!(self, ExerciseTag::General)
    }
}

/// Outcome of the gate for a single request, kept for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDecision {
    /// Served from the cache.
    Hit,
    /// Looked up, missed, result stored.
    Stored,
    /// Looked up, missed, store was full so nothing was stored.
    Full,
    /// Tenant has audio caching turned off.
    Disabled,
    /// Exercise-specific request, never cached.
    ExerciseScoped,
}

pub struct CachePolicy;

impl CachePolicy {
    pub fn may_read(cache_enabled: bool, tag: &ExerciseTag) -> bool {
        cache_enabled && tag.is_general()
    }

    pub fn may_write(cache_enabled: bool, has_room: bool, tag: &ExerciseTag) -> bool {
        cache_enabled && has_room && tag.is_general()
    }

    /// Why a request skips the cache entirely, if it does.
    pub fn bypass_reason(cache_enabled: bool, tag: &ExerciseTag) -> Option<CacheDecision> {
        if !cache_enabled {
            Some(CacheDecision::Disabled)
        } else if !tag.is_general() {
            Some(CacheDecision::ExerciseScoped)
        } else {
            None
        }
    }
}
