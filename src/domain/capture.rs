use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

use crate::domain::clip::ClipUrl;
use crate::domain::error::PracticeError;

/// Number of buckets in the visualization waveform.
pub const WAVEFORM_BARS: usize = 24;

/// Capture session state machine.
///
/// State transitions:
/// - Idle -> Acquiring (start)
/// - Acquiring -> Recording (stream acquired)
/// - Acquiring -> Idle (acquisition failed or cancelled)
/// - Recording -> Finalizing (stop)
/// - Finalizing -> Stopped (clip validated and published)
/// - Finalizing -> Idle (validation failed)
/// - Stopped -> Idle (clear)
/// - any -> Idle (cancel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CaptureState {
    Idle = 0,
    Acquiring = 1,
    Recording = 2,
    Finalizing = 3,
    Stopped = 4,
}

impl CaptureState {
    /// A new session may only begin when nothing is in flight.
    #[must_use]
    pub fn can_start(&self) -> bool {
        matches!(self, CaptureState::Idle | CaptureState::Stopped)
    }

    #[must_use]
    pub fn can_stop(&self) -> bool {
        matches!(self, CaptureState::Recording)
    }

    /// Acquiring and finalizing are mid-transition.
    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        matches!(self, CaptureState::Acquiring | CaptureState::Finalizing)
    }
}

impl From<u8> for CaptureState {
    fn from(value: u8) -> Self {
        match value {
            1 => CaptureState::Acquiring,
            2 => CaptureState::Recording,
            3 => CaptureState::Finalizing,
            4 => CaptureState::Stopped,
            _ => CaptureState::Idle,
        }
    }
}

impl From<CaptureState> for u8 {
    fn from(state: CaptureState) -> Self {
        state as u8
    }
}

/// Atomic wrapper for CaptureState for lock-free reads.
#[derive(Debug)]
pub struct AtomicCaptureState(AtomicU8);

impl AtomicCaptureState {
    pub fn new(state: CaptureState) -> Self {
        Self(AtomicU8::new(state.into()))
    }

    pub fn load(&self) -> CaptureState {
        self.0.load(Ordering::Acquire).into()
    }

    pub fn store(&self, state: CaptureState) {
        self.0.store(state.into(), Ordering::Release);
    }

    /// Compare and swap, returns true if successful.
    pub fn compare_exchange(&self, current: CaptureState, new: CaptureState) -> bool {
        self.0
            .compare_exchange(current.into(), new.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicCaptureState {
    fn default() -> Self {
        Self::new(CaptureState::Idle)
    }
}

/// Microphone permission as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    #[default]
    Unknown,
    Granted,
    Denied,
    Prompt,
}

/// Events emitted by the capture manager.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum CaptureEvent {
    StateChanged { from: CaptureState, to: CaptureState },
    StreamAcquired { generation: u64, reused: bool },
    StreamReleased { generation: u64 },
    AcquireRetry { attempt: u32, error: PracticeError },
    ChunkRecorded { index: usize, bytes: usize },
    ClipReady { url: ClipUrl, duration_secs: f32 },
    Error { error: PracticeError },
    /// The stream ended while recording; the session is back to Idle.
    StreamLost { generation: u64, error: PracticeError },
    Level { volume: f32 },
}

/// Observable capture state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSnapshot {
    pub state: CaptureState,
    pub recording: bool,
    pub playing: bool,
    pub volume: f32,
    pub waveform: [f32; WAVEFORM_BARS],
    pub clip_url: Option<ClipUrl>,
    pub mime_type: Option<String>,
    pub error: Option<PracticeError>,
    pub permission: PermissionState,
    pub stream_active: bool,
}

/// RMS volume of a window, amplified and clamped to `[0, 1]`.
pub fn rms_volume(samples: &[f32], gain: f32) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
    let rms = (sum_squares / samples.len() as f64).sqrt() as f32;
    (rms * gain).clamp(0.0, 1.0)
}

/// Down-sample a window into [`WAVEFORM_BARS`] peak-average buckets.
pub fn waveform(samples: &[f32], gain: f32) -> [f32; WAVEFORM_BARS] {
    let mut bars = [0.0f32; WAVEFORM_BARS];
    if samples.is_empty() {
        return bars;
    }
    let bucket = (samples.len() / WAVEFORM_BARS).max(1);
    for (bar, chunk) in bars.iter_mut().zip(samples.chunks(bucket)) {
        let mean_abs = chunk.iter().map(|s| s.abs()).sum::<f32>() / chunk.len() as f32;
        *bar = (mean_abs * gain).clamp(0.0, 1.0);
    }
    bars
}
