use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{PracticeError, RecognitionConfig};

/// Error categories reported by a speech recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerErrorKind {
    NoSpeech,
    Aborted,
    AudioCapture,
    NotAllowed,
    Network,
    Other,
}

/// Events delivered by a running recognizer session.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    Started,
    /// A transcript segment. Final segments are stable; interim ones may be
    /// replaced by later events.
    Transcript { text: String, is_final: bool },
    SpeechEnded,
    Error { kind: RecognizerErrorKind, message: String },
    /// The session is over; no further events follow.
    Ended,
}

impl RecognizerEvent {
    /// Map a recognizer error onto the practice error taxonomy.
    pub fn into_error(kind: RecognizerErrorKind, message: String) -> PracticeError {
        match kind {
            RecognizerErrorKind::NotAllowed => PracticeError::PermissionDenied(message),
            RecognizerErrorKind::AudioCapture => PracticeError::DeviceNotFound(message),
            RecognizerErrorKind::NoSpeech => PracticeError::RecognitionTimeout,
            RecognizerErrorKind::Aborted => PracticeError::Cancelled,
            RecognizerErrorKind::Network | RecognizerErrorKind::Other => {
                PracticeError::Recognition(message)
            }
        }
    }
}

/// Port for a streaming speech-to-text engine.
///
/// The engine acquires its own audio input; it does not borrow the capture
/// manager's stream.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Begin a session. Events arrive on the returned channel until
    /// [`RecognizerEvent::Ended`].
    async fn start(
        &self,
        config: &RecognitionConfig,
    ) -> Result<mpsc::UnboundedReceiver<RecognizerEvent>, PracticeError>;

    /// Stop listening and deliver any final result, then end.
    fn stop(&self);

    /// End immediately, discarding pending results.
    fn abort(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognizer_error_mapping() {
        assert_eq!(
            RecognizerEvent::into_error(RecognizerErrorKind::NoSpeech, String::new()),
            PracticeError::RecognitionTimeout
        );
        assert!(matches!(
            RecognizerEvent::into_error(RecognizerErrorKind::NotAllowed, "denied".into()),
            PracticeError::PermissionDenied(_)
        ));
        assert!(matches!(
            RecognizerEvent::into_error(RecognizerErrorKind::Network, "offline".into()),
            PracticeError::Recognition(_)
        ));
    }
}
