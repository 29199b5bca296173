use serde::{Deserialize, Serialize};

use crate::domain::error::PracticeError;

/// Per-session recognizer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionConfig {
    pub lang: String,
    pub interim_results: bool,
    pub continuous: bool,
    /// Silence after the last result that ends the session.
    pub silence_threshold_ms: u64,
    /// Time allowed before the first result arrives.
    pub initial_grace_ms: u64,
    /// Hard upper bound for the whole session.
    pub safety_timeout_ms: u64,
    /// How long a stopping recognizer may take to end.
    pub stop_grace_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            lang: "en-US".to_string(),
            interim_results: true,
            continuous: true,
            silence_threshold_ms: 1_500,
            initial_grace_ms: 5_000,
            safety_timeout_ms: 8_000,
            stop_grace_ms: 2_000,
        }
    }
}

/// Why a recognition session stopped listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// No result arrived within the initial grace period.
    InitialGrace,
    /// Silence after the last result exceeded the threshold.
    Silence,
    /// The session hit its safety timeout.
    Safety,
    /// The caller asked the session to stop.
    Manual,
    /// The recognizer ended on its own.
    Recognizer,
}

/// Final result of one recognition session.
pub type RecognitionOutcome = Result<String, PracticeError>;

/// Observable state of the recognition adapter.
///
/// `listening` is true while the recognizer accepts audio. `processing` is
/// true from the moment a stop is requested until the recognizer delivers its
/// final result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionSnapshot {
    pub listening: bool,
    pub processing: bool,
    pub transcript: String,
    pub error: Option<PracticeError>,
    pub config: Option<RecognitionConfig>,
}

