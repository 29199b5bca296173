pub mod alignment;
pub mod capture;
pub mod clip;
pub mod config;
pub mod environment;
pub mod error;
pub mod playback;
pub mod practice;
pub mod recognition;

pub use alignment::{align, AlignmentResult, DiffSpan, SpanKind};
pub use capture::{AtomicCaptureState, CaptureEvent, CaptureSnapshot, CaptureState, PermissionState};
pub use clip::{AudioClip, ClipRegistry, ClipUrl};
pub use config::{AppConfig, Locale};
pub use environment::{EnvironmentProfile, MediaConstraints, RetryPolicy};
pub use error::PracticeError;
pub use playback::OutputChain;
pub use practice::{PracticeEvent, PracticeMode, PracticePhase, PracticeSnapshot, PracticeTarget, RoundOutcome};
pub use recognition::{RecognitionConfig, RecognitionOutcome, RecognitionSnapshot, StopReason};
