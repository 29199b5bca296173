use serde::{Deserialize, Serialize};

use crate::domain::alignment::{AlignmentResult, DiffSpan};
use crate::domain::capture::{CaptureSnapshot, WAVEFORM_BARS};
use crate::domain::clip::ClipUrl;
use crate::domain::error::PracticeError;
use crate::domain::recognition::RecognitionSnapshot;

/// Phrase to practice, supplied by the vocabulary collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PracticeTarget {
    pub text: String,
}

impl PracticeTarget {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Practice flow state machine.
///
/// ```text
/// Idle ──begin──▶ Playing ──speech done──▶ Recording      (shadow-reading)
/// Idle ──begin_recording──────────────────▶ Recording      (single-card)
/// Recording ──recognizer settled──▶ Processing ──scored──▶ Result
/// Recording / Processing ──error──▶ Result (with error)
/// any ──cancel / next / prev / exit──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PracticePhase {
    #[default]
    Idle,
    Playing,
    Recording,
    Processing,
    Result,
}

impl PracticePhase {
    /// A round is in flight and owns device resources.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            PracticePhase::Playing | PracticePhase::Recording | PracticePhase::Processing
        )
    }

    /// A new round may begin from this phase.
    #[must_use]
    pub fn can_begin(&self) -> bool {
        !self.is_busy()
    }

    pub fn label(&self) -> &'static str {
        match self {
            PracticePhase::Idle => "Idle",
            PracticePhase::Playing => "Playing",
            PracticePhase::Recording => "Recording",
            PracticePhase::Processing => "Processing",
            PracticePhase::Result => "Result",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeMode {
    #[default]
    SingleCard,
    ShadowReading,
}

/// Terminal payload of a practice round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoundOutcome {
    Scored {
        transcript: String,
        alignment: AlignmentResult,
        spans: Vec<DiffSpan>,
        clip_url: Option<ClipUrl>,
    },
    Failed {
        error: PracticeError,
        message: String,
    },
}

impl RoundOutcome {
    pub fn score(&self) -> Option<f32> {
        match self {
            RoundOutcome::Scored { alignment, .. } => Some(alignment.score),
            RoundOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&PracticeError> {
        match self {
            RoundOutcome::Scored { .. } => None,
            RoundOutcome::Failed { error, .. } => Some(error),
        }
    }
}

/// Events emitted by the orchestrator. `at_ms` is measured from orchestrator
/// creation on a monotonic clock.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum PracticeEvent {
    PhaseChanged { round: u64, from: PracticePhase, to: PracticePhase, at_ms: u64 },
    PlaybackCompleted { round: u64, at_ms: u64 },
    RecordingStarted { round: u64, at_ms: u64 },
    RecognitionSettled { round: u64, at_ms: u64 },
    CaptureStopped { round: u64, at_ms: u64 },
    RoundFinished { round: u64, outcome: RoundOutcome },
    Cancelled { round: u64 },
}

/// Everything the UI observes about the practice subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PracticeSnapshot {
    pub phase: PracticePhase,
    pub mode: PracticeMode,
    pub round: u64,
    pub target: Option<PracticeTarget>,
    pub outcome: Option<RoundOutcome>,
    pub playing: bool,
    pub recording: bool,
    pub listening: bool,
    pub processing: bool,
    pub transcript: String,
    pub volume: f32,
    pub waveform: [f32; WAVEFORM_BARS],
    pub blob_url: Option<ClipUrl>,
    pub error: Option<PracticeError>,
    pub error_message: Option<String>,
}

impl PracticeSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn compose(
        phase: PracticePhase,
        mode: PracticeMode,
        round: u64,
        target: Option<PracticeTarget>,
        outcome: Option<RoundOutcome>,
        playing: bool,
        capture: CaptureSnapshot,
        recognition: RecognitionSnapshot,
        message: impl Fn(&PracticeError) -> String,
    ) -> Self {
        let error = outcome
            .as_ref()
            .and_then(|o| o.error().cloned())
            .or(capture.error)
            .or(recognition.error);
        let error_message = error.as_ref().map(|e| message(e));
        Self {
            phase,
            mode,
            round,
            target,
            outcome,
            playing: playing || capture.playing,
            recording: capture.recording,
            listening: recognition.listening,
            processing: recognition.processing || phase == PracticePhase::Processing,
            transcript: recognition.transcript,
            volume: capture.volume,
            waveform: capture.waveform,
            blob_url: capture.clip_url,
            error,
            error_message,
        }
    }

    /// JSON form handed to the hosting WebView.
    pub fn to_json(&self) -> Result<String, PracticeError> {
        Ok(serde_json::to_string(self)?)
    }
}
