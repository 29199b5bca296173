use serde::{Deserialize, Serialize};

use crate::domain::alignment::tokenize;
use crate::domain::recognition::RecognitionConfig;

/// Interface language for learner-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Locale {
    #[serde(rename = "en")]
    En,
    #[default]
    #[serde(rename = "zh-TW")]
    ZhTw,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Enable file logging with rotation.
    pub file_logging: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: true,
        }
    }
}

/// Host environment hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// User agent reported by the hosting WebView, if any.
    pub user_agent: Option<String>,
    /// Force the fragile embedded-host policies on or off.
    pub force_embedded: Option<bool>,
}

/// Microphone capture and clip validation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interval at which the recorder emits an encoded chunk.
    pub chunk_interval_ms: u64,
    /// Time to keep draining frames after stop before finalizing.
    pub stop_grace_ms: u64,
    /// A trailing chunk below this size is dropped when more than two chunks exist.
    pub min_chunk_bytes: usize,
    /// Clips below this size are rejected as empty.
    pub min_total_bytes: usize,
    /// Clips at or below this duration are rejected.
    pub min_duration_secs: f32,
    /// Upper bound for decode-checking the assembled clip.
    pub verify_timeout_ms: u64,
    /// Telemetry sampling interval.
    pub telemetry_interval_ms: u64,
    /// Amplification applied to raw levels before clamping for display.
    pub visual_gain: f32,
    /// Idle window a fragile host keeps the stream open after a session.
    pub keep_warm_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_interval_ms: 100,
            stop_grace_ms: 200,
            min_chunk_bytes: 320,
            min_total_bytes: 3_200,
            min_duration_secs: 0.1,
            verify_timeout_ms: 3_000,
            telemetry_interval_ms: 150,
            visual_gain: 4.0,
            keep_warm_secs: 30,
        }
    }
}

/// Text-to-speech playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Voice language passed to the synthesizer.
    pub lang: String,
    /// Multiplier applied on top of the environment gain tier.
    pub volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            lang: "en-US".to_string(),
            volume: 1.0,
        }
    }
}

/// Speech recognition settings and phrase-length tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    pub lang: String,
    pub interim_results: bool,
    pub continuous: bool,
    /// Silence tolerance for a one-word phrase.
    pub base_silence_ms: u64,
    /// Extra silence tolerance per target token.
    pub silence_per_token_ms: u64,
    pub max_silence_ms: u64,
    /// Time allowed before the first result arrives.
    pub initial_grace_ms: u64,
    /// Safety timeout for a one-word phrase.
    pub base_safety_ms: u64,
    /// Extra safety timeout per target token.
    pub safety_per_token_ms: u64,
    pub max_safety_ms: u64,
    /// How long a stopping recognizer may take to deliver its final result.
    pub stop_grace_ms: u64,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            lang: "en-US".to_string(),
            interim_results: true,
            continuous: true,
            base_silence_ms: 1_500,
            silence_per_token_ms: 150,
            max_silence_ms: 4_000,
            initial_grace_ms: 5_000,
            base_safety_ms: 8_000,
            safety_per_token_ms: 800,
            max_safety_ms: 30_000,
            stop_grace_ms: 2_000,
        }
    }
}

impl RecognitionSettings {
    /// Recognition config scaled to the length of the target phrase.
    ///
    /// Longer phrases get more silence tolerance and a longer safety timeout.
    pub fn for_phrase(&self, phrase: &str) -> RecognitionConfig {
        let extra_tokens = tokenize(phrase).len().saturating_sub(1) as u64;
        let silence = (self.base_silence_ms + self.silence_per_token_ms * extra_tokens)
            .min(self.max_silence_ms.max(self.base_silence_ms));
        let safety = (self.base_safety_ms + self.safety_per_token_ms * extra_tokens)
            .min(self.max_safety_ms.max(self.base_safety_ms));

        RecognitionConfig {
            lang: self.lang.clone(),
            interim_results: self.interim_results,
            continuous: self.continuous,
            silence_threshold_ms: silence,
            initial_grace_ms: self.initial_grace_ms.max(silence),
            safety_timeout_ms: safety,
            stop_grace_ms: self.stop_grace_ms,
        }
    }
}

/// Practice flow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PracticeConfig {
    pub locale: Locale,
    /// Speak a card's phrase when it is presented in single-card mode.
    pub voice_auto_play: bool,
    /// Delay between recognizer settlement and capture stop.
    pub capture_stop_grace_ms: u64,
    /// Maximum number of clip URLs alive at once.
    pub max_clip_urls: usize,
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            locale: Locale::default(),
            voice_auto_play: false,
            capture_stop_grace_ms: 300,
            max_clip_urls: 8,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub environment: EnvironmentConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub recognition: RecognitionSettings,
    pub practice: PracticeConfig,
}

impl AppConfig {
    /// Create a new AppConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }
}
