use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use crate::domain::error::PracticeError;

/// Encoded audio clip that is securely zeroed on drop.
/// Clips live only in memory for the duration of a practice round.
#[derive(Debug, Zeroize)]
#[zeroize(drop)]
pub struct AudioClip {
    bytes: Vec<u8>,
    #[zeroize(skip)]
    mime_type: String,
    #[zeroize(skip)]
    duration_secs: f32,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, duration_secs: f32) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            duration_secs,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn duration_secs(&self) -> f32 {
        self.duration_secs
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Opaque object URL referencing a registered clip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipUrl(String);

impl ClipUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClipUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry of published clips, addressed by object URL.
///
/// Every URL handed out must eventually be revoked; `outstanding()` exposes
/// the live count so leaks are observable.
#[derive(Debug)]
pub struct ClipRegistry {
    clips: Mutex<HashMap<ClipUrl, Arc<AudioClip>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl ClipRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            clips: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    /// Register a clip and return its URL.
    pub fn create_url(&self, clip: AudioClip) -> Result<ClipUrl, PracticeError> {
        if clip.is_empty() {
            return Err(PracticeError::BlobCreationFailed("clip has no data".to_string()));
        }

        let mut clips = self.clips.lock();
        if clips.len() >= self.capacity {
            return Err(PracticeError::BlobCreationFailed(format!(
                "{} clip URLs already outstanding",
                clips.len()
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let url = ClipUrl(format!("blob:speech-practice/{id}"));
        debug!(url = %url, bytes = clip.len(), "Clip URL created");
        clips.insert(url.clone(), Arc::new(clip));
        Ok(url)
    }

    /// Drop the clip behind a URL. Revoking an unknown URL is a no-op.
    pub fn revoke(&self, url: &ClipUrl) -> bool {
        let removed = self.clips.lock().remove(url).is_some();
        if removed {
            debug!(url = %url, "Clip URL revoked");
        }
        removed
    }

    pub fn resolve(&self, url: &ClipUrl) -> Option<Arc<AudioClip>> {
        self.clips.lock().get(url).cloned()
    }

    /// Number of URLs that have not been revoked.
    pub fn outstanding(&self) -> usize {
        self.clips.lock().len()
    }
}

impl Default for ClipRegistry {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip() -> AudioClip {
        AudioClip::new(vec![1, 2, 3, 4], "audio/wav", 0.5)
    }

    #[test]
    fn test_create_resolve_revoke() {
        let registry = ClipRegistry::new(4);
        let url = registry.create_url(clip()).unwrap();
        assert_eq!(registry.outstanding(), 1);
        assert_eq!(registry.resolve(&url).unwrap().mime_type(), "audio/wav");

        assert!(registry.revoke(&url));
        assert!(!registry.revoke(&url));
        assert_eq!(registry.outstanding(), 0);
        assert!(registry.resolve(&url).is_none());
    }

    #[test]
    fn test_urls_are_unique() {
        let registry = ClipRegistry::new(4);
        let a = registry.create_url(clip()).unwrap();
        let b = registry.create_url(clip()).unwrap();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("blob:"));
    }

    #[test]
    fn test_capacity_exhaustion_fails() {
        let registry = ClipRegistry::new(1);
        registry.create_url(clip()).unwrap();
        let err = registry.create_url(clip()).unwrap_err();
        assert!(matches!(err, PracticeError::BlobCreationFailed(_)));
    }

    #[test]
    fn test_empty_clip_rejected() {
        let registry = ClipRegistry::default();
        let err = registry.create_url(AudioClip::new(Vec::new(), "audio/wav", 0.0)).unwrap_err();
        assert!(matches!(err, PracticeError::BlobCreationFailed(_)));
        assert_eq!(registry.outstanding(), 0);
    }
}
