pub mod config;
pub mod media;
pub mod output;
pub mod recognizer;
pub mod synthesizer;

pub use config::ConfigStore;
pub use media::{MediaAccessError, MediaDevices, MediaErrorKind, MediaStream, PcmFrame};
pub use output::AudioOutput;
pub use recognizer::{RecognizerErrorKind, RecognizerEvent, SpeechRecognizer};
pub use synthesizer::{SpeechSynthesizer, SynthesizedSpeech};
