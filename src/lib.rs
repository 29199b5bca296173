#![forbid(unsafe_code)]

//! Speech practice and pronunciation scoring.
//!
//! A learner hears a target phrase, repeats it into the microphone, and gets
//! back a word-level alignment of what the recognizer heard against what was
//! expected. Microphone capture, speech output and recognition are reached
//! through the traits in [`ports`]; [`app::PracticeOrchestrator`] sequences
//! them into rounds.

pub mod adapters;
pub mod app;
pub mod domain;
pub mod infrastructure;
pub mod ports;

#[cfg(test)]
mod test_support;

pub use app::{
    AppController, AudioCaptureManager, PlaybackController, PracticeBackends,
    PracticeOrchestrator, SpeechRecognitionAdapter,
};
pub use domain::{
    align, AlignmentResult, DiffSpan, PracticeError, PracticeEvent, PracticePhase,
    PracticeSnapshot, PracticeTarget, RoundOutcome,
};
