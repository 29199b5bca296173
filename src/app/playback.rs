use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::config::PlaybackConfig;
use crate::domain::{EnvironmentProfile, OutputChain, PracticeError};
use crate::infrastructure::wav;
use crate::ports::{AudioOutput, SpeechSynthesizer};

/// Speaks target phrases with environment-aware gain.
pub struct PlaybackController {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    chain: OutputChain,
    lang: String,
    playing: AtomicBool,
    generation: AtomicU64,
}

impl PlaybackController {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        profile: EnvironmentProfile,
        config: &PlaybackConfig,
    ) -> Self {
        let chain = OutputChain::for_profile(&profile).with_volume(config.volume);
        info!(
            tier = ?profile.tier(),
            gain = chain.gain,
            compressor = chain.compressor.is_some(),
            "PlaybackController initialized"
        );
        Self {
            synthesizer,
            output,
            chain,
            lang: config.lang.clone(),
            playing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Speak `text` and resolve once playback has finished.
    ///
    /// Returns `Cancelled` when interrupted by [`stop`](Self::stop) or a newer
    /// utterance.
    pub async fn speak(&self, text: &str) -> Result<(), PracticeError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.output.stop();
        self.playing.store(true, Ordering::SeqCst);

        let result = self.speak_inner(text, generation).await;

        if self.is_current(generation) {
            self.playing.store(false, Ordering::SeqCst);
            result
        } else {
            Err(PracticeError::Cancelled)
        }
    }

    async fn speak_inner(&self, text: &str, generation: u64) -> Result<(), PracticeError> {
        let speech = self.synthesizer.synthesize(text, &self.lang).await?;
        if !self.is_current(generation) {
            return Err(PracticeError::Cancelled);
        }

        let graph = match wav::decode_wav(&speech.bytes) {
            Ok((samples, sample_rate)) => {
                debug!(samples = samples.len(), sample_rate, "Playing speech through output graph");
                self.output.play_graph(samples, sample_rate, self.chain).await
            }
            Err(err) => Err(err),
        };

        match graph {
            Ok(()) => Ok(()),
            Err(_) if !self.is_current(generation) => Err(PracticeError::Cancelled),
            Err(err) => {
                warn!(error = %err, mime = %speech.mime_type, "Graph playback failed, falling back to direct playback");
                self.output.play_direct(&speech.bytes, 1.0).await
            }
        }
    }

    /// Interrupt playback. A pending [`speak`](Self::speak) settles.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.playing.swap(false, Ordering::SeqCst) {
            debug!("Playback interrupted");
        }
        self.output.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Output chain applied to synthesized speech.
    pub fn chain(&self) -> OutputChain {
        self.chain
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::{FakeOutput, FakeSynthesizer};

    fn embedded_ios() -> EnvironmentProfile {
        EnvironmentProfile {
            is_embedded_host_webview: true,
            is_mobile: true,
            is_ios: true,
        }
    }

    #[tokio::test]
    async fn test_speak_uses_environment_gain() {
        let output = Arc::new(FakeOutput::default());
        let controller = PlaybackController::new(
            Arc::new(FakeSynthesizer::default()),
            output.clone(),
            embedded_ios(),
            &PlaybackConfig::default(),
        );

        controller.speak("I love apples").await.unwrap();
        let chains = output.graph_plays();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].gain, 3.0);
        assert!(chains[0].compressor.is_some());
        assert!(!controller.is_playing());
    }

    #[tokio::test]
    async fn test_user_volume_scales_gain() {
        let output = Arc::new(FakeOutput::default());
        let controller = PlaybackController::new(
            Arc::new(FakeSynthesizer::default()),
            output.clone(),
            EnvironmentProfile::desktop(),
            &PlaybackConfig {
                volume: 0.5,
                ..PlaybackConfig::default()
            },
        );

        controller.speak("hello").await.unwrap();
        assert_eq!(output.graph_plays()[0].gain, 0.5);
        assert!(output.graph_plays()[0].compressor.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_speech_falls_back_to_direct() {
        let output = Arc::new(FakeOutput::default());
        let controller = PlaybackController::new(
            Arc::new(FakeSynthesizer::returning(b"not a wav".to_vec())),
            output.clone(),
            embedded_ios(),
            &PlaybackConfig::default(),
        );

        controller.speak("hello").await.unwrap();
        assert!(output.graph_plays().is_empty());
        assert_eq!(output.direct_plays(), vec![1.0]);
    }

    #[tokio::test]
    async fn test_graph_failure_falls_back_to_direct() {
        let output = Arc::new(FakeOutput::default());
        output.fail_graph();
        let controller = PlaybackController::new(
            Arc::new(FakeSynthesizer::default()),
            output.clone(),
            EnvironmentProfile::desktop(),
            &PlaybackConfig::default(),
        );

        controller.speak("hello").await.unwrap();
        assert_eq!(output.direct_plays(), vec![1.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_settles_pending_speak() {
        let output = Arc::new(FakeOutput::default());
        let controller = Arc::new(PlaybackController::new(
            Arc::new(FakeSynthesizer::with_duration(Duration::from_secs(5))),
            output.clone(),
            EnvironmentProfile::desktop(),
            &PlaybackConfig::default(),
        ));

        let pending = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.speak("a long sentence").await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(controller.is_playing());

        controller.stop();
        assert_eq!(pending.await.unwrap(), Err(PracticeError::Cancelled));
        assert!(!controller.is_playing());
        assert!(output.direct_plays().is_empty());
    }
}
