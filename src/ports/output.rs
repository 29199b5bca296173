use async_trait::async_trait;

use crate::domain::{OutputChain, PracticeError};

/// Port for audio output.
///
/// Two playback paths exist: a processing graph that applies gain and
/// compression to decoded samples, and a direct path that hands an encoded
/// clip to the platform player.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play decoded mono samples through the processing chain.
    ///
    /// Resolves when playback has finished or was stopped.
    async fn play_graph(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        chain: OutputChain,
    ) -> Result<(), PracticeError>;

    /// Play an encoded clip at the given volume (0.0 - 1.0).
    ///
    /// Resolves when playback has finished or was stopped.
    async fn play_direct(&self, clip: &[u8], volume: f32) -> Result<(), PracticeError>;

    /// Interrupt any playback in progress.
    fn stop(&self);
}
