//! Speech synthesis core: request fingerprinting, the bounded audio
//! response cache, cache eligibility rules, tenant settings and the
//! provider seam.

pub mod error;
pub mod fingerprint;
pub mod policy;
pub mod provider;
pub mod service;
pub mod settings;
pub mod store;

pub use error::{classify_provider_failure, SynthesisError};
pub use fingerprint::{fingerprint, CacheKey, FingerprintInput};
pub use policy::{CacheDecision, CachePolicy, ExerciseTag};
pub use provider::{SpeechSynthesizer, SynthesisParams};
pub use service::{AudioOrigin, SpeechRequest, SpeechService, SpokenAudio};
pub use settings::{
    ApiKeyInfo, ApiKeySource, InMemorySettingsStore, ResponseFormat, SettingsStore,
    SpeechSettings, UserSettings,
};
pub use store::{AudioCache, CacheStats, ClearReport, EntrySummary, DEFAULT_MAX_ENTRIES};
