pub mod capture;
pub mod controller;
pub mod orchestrator;
pub mod playback;
pub mod recognition;

pub use capture::AudioCaptureManager;
pub use controller::{AppController, PracticeBackends};
pub use orchestrator::PracticeOrchestrator;
pub use playback::PlaybackController;
pub use recognition::SpeechRecognitionAdapter;
