use async_trait::async_trait;

use crate::domain::PracticeError;

/// Speech produced by a text-to-speech engine.
#[derive(Debug, Clone)]
pub struct SynthesizedSpeech {
    /// Encoded audio (WAV for the graph path; any platform-playable format
    /// for the direct path).
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Port for text-to-speech synthesis.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` in the given BCP 47 language.
    async fn synthesize(&self, text: &str, lang: &str) -> Result<SynthesizedSpeech, PracticeError>;
}
