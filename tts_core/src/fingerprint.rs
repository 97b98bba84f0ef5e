//! Cache keys for synthesized audio.
//!
//! A key is derived from everything that shapes the audio a request gets
//! back: the normalized text, the voice configuration, the request hints and
//! the tenant. The caller-supplied timestamp takes part too, so a request
//! that carries a fresh timestamp never matches an older entry.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

pub const NO_SESSION: &str = "no-session";
pub const NO_CARD: &str = "no-card";
pub const GENERAL_EXERCISE: &str = "general";

/// Number of digest bytes kept in a key (128 bits).
const KEY_BYTES: usize = 16;
/// Characters of a key shown in diagnostics.
const PREVIEW_CHARS: usize = 16;

/// Opaque fixed-length fingerprint of a synthesis request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated display form. Never the whole key.
    pub fn preview(&self) -> String {
        let head: String = self.0.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.preview())
    }
}

/// Request-shaping fields that go into a fingerprint.
#[derive(Debug, Clone)]
pub struct FingerprintInput<'a> {
    pub text: &'a str,
    pub model: &'a str,
    pub voice: &'a str,
    pub speed: f64,
    pub voice_style: &'a str,
    pub custom_instructions: &'a str,
    pub session_id: Option<&'a str>,
    pub card_id: Option<&'a str>,
    pub exercise: Option<&'a str>,
    /// Unix milliseconds. Resolved by the caller when the request omits it.
    pub timestamp: i64,
    pub user_id: &'a str,
}

// Field order here is the canonical order of the serialized form.
#[derive(Serialize)]
struct Canonical<'a> {
    text: String,
    model: &'a str,
    voice: &'a str,
    speed: f64,
    style: &'a str,
    custom: &'a str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
    #[serde(rename = "cardId")]
    card_id: &'a str,
    exercise: &'a str,
    timestamp: i64,
    #[serde(rename = "userId")]
    user_id: &'a str,
}

/// Lower-case and trim, the only normalization applied to the text.
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Compute the cache key for a request. Pure: same input, same key.
pub fn fingerprint(input: &FingerprintInput<'_>) -> CacheKey {
    let canonical = Canonical {
        text: normalize_text(input.text),
        model: input.model,
        voice: input.voice,
        speed: input.speed,
        style: input.voice_style,
        custom: input.custom_instructions,
        session_id: input.session_id.unwrap_or(NO_SESSION),
        card_id: input.card_id.unwrap_or(NO_CARD),
        exercise: input.exercise.unwrap_or(GENERAL_EXERCISE),
        timestamp: input.timestamp,
        user_id: input.user_id,
    };

    // A struct of strings and numbers cannot fail to serialize; NaN speed
    // becomes `null`, which is still deterministic.
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    CacheKey(hex::encode(&digest[..KEY_BYTES]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> FingerprintInput<'static> {
        FingerprintInput {
            text: "Hello",
            model: "tts-1",
            voice: "alloy",
            speed: 1.0,
            voice_style: "neutral",
            custom_instructions: "",
            session_id: Some("session-1"),
            card_id: Some("card-1"),
            exercise: None,
            timestamp: 1_700_000_000_000,
            user_id: "user-1",
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic_and_fixed_length() {
        let a = fingerprint(&base());
        let b = fingerprint(&base());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), KEY_BYTES * 2);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_text_normalization() {
        let padded = FingerprintInput {
            text: "  HeLLo \n",
            ..base()
        };
        let lower = FingerprintInput {
            text: "hello",
            ..base()
        };
        assert_eq!(fingerprint(&padded), fingerprint(&lower));
        assert_eq!(fingerprint(&padded), fingerprint(&base()));
    }

    #[test]
    fn test_every_field_changes_the_key() {
        let reference = fingerprint(&base());
        let variants = vec![
            FingerprintInput { text: "goodbye", ..base() },
            FingerprintInput { model: "tts-1-hd", ..base() },
            FingerprintInput { voice: "nova", ..base() },
            FingerprintInput { speed: 1.25, ..base() },
            FingerprintInput { voice_style: "calm", ..base() },
            FingerprintInput { custom_instructions: "slowly", ..base() },
            FingerprintInput { session_id: Some("session-2"), ..base() },
            FingerprintInput { card_id: Some("card-2"), ..base() },
            FingerprintInput { exercise: Some("quiz-123"), ..base() },
            FingerprintInput { timestamp: 1_700_000_000_001, ..base() },
            FingerprintInput { user_id: "user-2", ..base() },
        ];
        for variant in variants {
            assert_ne!(fingerprint(&variant), reference, "{variant:?}");
        }
    }

    #[test]
    fn test_sentinels_match_explicit_values() {
        let implicit = FingerprintInput {
            session_id: None,
            card_id: None,
            exercise: None,
            ..base()
        };
        let explicit = FingerprintInput {
            session_id: Some(NO_SESSION),
            card_id: Some(NO_CARD),
            exercise: Some(GENERAL_EXERCISE),
            ..base()
        };
        assert_eq!(fingerprint(&implicit), fingerprint(&explicit));
    }

    #[test]
    fn test_general_and_exercise_tags_differ() {
        let general = FingerprintInput { exercise: Some("general"), ..base() };
        let quiz = FingerprintInput { exercise: Some("quiz-123"), ..base() };
        assert_ne!(fingerprint(&general), fingerprint(&quiz));
    }

    #[test]
    fn test_preview_truncates() {
        let key = fingerprint(&base());
        let preview = key.preview();
        assert_eq!(preview.len(), PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
        assert!(key.as_str().starts_with(&preview[..PREVIEW_CHARS]));
        assert_ne!(preview, key.as_str());
    }
}
