use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::Locale;
use crate::domain::environment::EnvironmentProfile;

/// Errors surfaced by the speech practice subsystem.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum PracticeError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("No usable audio input device: {0}")]
    DeviceNotFound(String),

    #[error("Audio acquisition aborted by host: {0}")]
    TransientAbort(String),

    #[error("Recording is empty or too short ({bytes} bytes)")]
    EmptyOrTooShortRecording { bytes: usize },

    #[error("Recorded clip failed validation: {0}")]
    DecodeOrValidationFailure(String),

    #[error("Speech recognition timed out without a transcript")]
    RecognitionTimeout,

    #[error("Failed to publish recorded clip: {0}")]
    BlobCreationFailed(String),

    #[error("Speech recognition error: {0}")]
    Recognition(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Not currently recording")]
    NotRecording,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl PracticeError {
    /// Whether the stream acquisition loop may try again after this error.
    ///
    /// Permission denials only self-heal inside a fragile embedded host, where a
    /// context switch can restore a grant the host failed to re-issue.
    #[must_use]
    pub fn is_retryable(&self, profile: &EnvironmentProfile) -> bool {
        match self {
            PracticeError::TransientAbort(_) => true,
            PracticeError::PermissionDenied(_) => profile.is_embedded_host_webview,
            _ => false,
        }
    }

    /// Terminal errors are surfaced immediately and never retried.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PracticeError::DeviceNotFound(_) | PracticeError::BlobCreationFailed(_)
        )
    }

    /// Short machine-readable code for the host UI.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            PracticeError::PermissionDenied(_) => "permission_denied",
            PracticeError::DeviceNotFound(_) => "device_not_found",
            PracticeError::TransientAbort(_) => "transient_abort",
            PracticeError::EmptyOrTooShortRecording { .. } => "empty_recording",
            PracticeError::DecodeOrValidationFailure(_) => "decode_failure",
            PracticeError::RecognitionTimeout => "recognition_timeout",
            PracticeError::BlobCreationFailed(_) => "blob_creation_failed",
            PracticeError::Recognition(_) => "recognition_error",
            PracticeError::Playback(_) => "playback_error",
            PracticeError::NotRecording => "not_recording",
            PracticeError::Cancelled => "cancelled",
            PracticeError::Config(_) => "config_error",
            PracticeError::Serialization(_) => "serialization_error",
            PracticeError::Io(_) => "io_error",
        }
    }

    /// Human-readable message shown to the learner.
    #[must_use]
    pub fn user_message(&self, locale: Locale) -> &'static str {
        match locale {
            Locale::En => self.message_en(),
            Locale::ZhTw => self.message_zh_tw(),
        }
    }

    fn message_en(&self) -> &'static str {
        match self {
            PracticeError::PermissionDenied(_) => {
                "Microphone access was denied. Allow microphone access and try again."
            }
            PracticeError::DeviceNotFound(_) => "No microphone was found on this device.",
            PracticeError::TransientAbort(_) => {
                "The microphone was interrupted. Please try again."
            }
            PracticeError::EmptyOrTooShortRecording { .. } => {
                "The recording was too short. Hold on a little longer while speaking."
            }
            PracticeError::DecodeOrValidationFailure(_) => {
                "The recording could not be processed. Please record again."
            }
            PracticeError::RecognitionTimeout => {
                "No speech was detected. Speak clearly after the prompt."
            }
            PracticeError::BlobCreationFailed(_) => "The recording could not be saved.",
            PracticeError::Recognition(_) => "Speech recognition failed. Please try again.",
            PracticeError::Playback(_) => "The phrase could not be played.",
            PracticeError::NotRecording => "Recording has not started.",
            PracticeError::Cancelled => "Practice was cancelled.",
            PracticeError::Config(_)
            | PracticeError::Serialization(_)
            | PracticeError::Io(_) => "An internal error occurred.",
        }
    }

    fn message_zh_tw(&self) -> &'static str {
        match self {
            PracticeError::PermissionDenied(_) => "麥克風權限被拒絕，請允許使用麥克風後再試一次。",
            PracticeError::DeviceNotFound(_) => "找不到可用的麥克風。",
            PracticeError::TransientAbort(_) => "麥克風被中斷，請再試一次。",
            PracticeError::EmptyOrTooShortRecording { .. } => "錄音太短，請說久一點。",
            PracticeError::DecodeOrValidationFailure(_) => "錄音無法處理，請重新錄音。",
            PracticeError::RecognitionTimeout => "沒有偵測到語音，請在提示後清楚發音。",
            PracticeError::BlobCreationFailed(_) => "錄音無法儲存。",
            PracticeError::Recognition(_) => "語音辨識失敗，請再試一次。",
            PracticeError::Playback(_) => "無法播放這個句子。",
            PracticeError::NotRecording => "尚未開始錄音。",
            PracticeError::Cancelled => "練習已取消。",
            PracticeError::Config(_)
            | PracticeError::Serialization(_)
            | PracticeError::Io(_) => "發生內部錯誤。",
        }
    }
}

impl From<std::io::Error> for PracticeError {
    fn from(err: std::io::Error) -> Self {
        PracticeError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for PracticeError {
    fn from(err: toml::de::Error) -> Self {
        PracticeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PracticeError {
    fn from(err: toml::ser::Error) -> Self {
        PracticeError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for PracticeError {
    fn from(err: serde_json::Error) -> Self {
        PracticeError::Serialization(err.to_string())
    }
}

impl From<hound::Error> for PracticeError {
    fn from(err: hound::Error) -> Self {
        PracticeError::DecodeOrValidationFailure(err.to_string())
    }
}
