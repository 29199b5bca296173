use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::{MediaConstraints, PermissionState, PracticeError};

/// Platform failure categories for microphone acquisition, mirroring the
/// error names a media stack reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorKind {
    NotAllowed,
    Security,
    NotFound,
    Overconstrained,
    Aborted,
    NotReadable,
    Unknown,
}

/// Raw acquisition failure reported by a [`MediaDevices`] implementation.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct MediaAccessError {
    pub kind: MediaErrorKind,
    pub message: String,
}

impl MediaAccessError {
    pub fn new(kind: MediaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<MediaAccessError> for PracticeError {
    fn from(err: MediaAccessError) -> Self {
        let detail = err.to_string();
        match err.kind {
            MediaErrorKind::NotAllowed | MediaErrorKind::Security => {
                PracticeError::PermissionDenied(detail)
            }
            MediaErrorKind::NotFound | MediaErrorKind::Overconstrained => {
                PracticeError::DeviceNotFound(detail)
            }
            MediaErrorKind::Aborted | MediaErrorKind::NotReadable | MediaErrorKind::Unknown => {
                PracticeError::TransientAbort(detail)
            }
        }
    }
}

/// A block of mono PCM samples in `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

/// A live microphone stream.
///
/// Dropping the last handle must release the device. `stop_tracks` releases
/// it eagerly and is idempotent.
pub trait MediaStream: Send + Sync {
    /// Stable identifier for logging.
    fn id(&self) -> String;

    /// True while at least one track is still delivering audio.
    fn is_active(&self) -> bool;

    fn sample_rate(&self) -> u32;

    /// Receive frames captured from now on.
    fn subscribe(&self) -> broadcast::Receiver<PcmFrame>;

    fn stop_tracks(&self);
}

/// Port for microphone acquisition.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Request a stream satisfying the constraints.
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<dyn MediaStream>, MediaAccessError>;

    /// Current microphone permission as reported by the platform.
    async fn permission_state(&self) -> PermissionState;
}
