use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use crate::adapters::{CpalAudioOutput, CpalMediaDevices, TomlConfigStore};
use crate::app::capture::AudioCaptureManager;
use crate::app::orchestrator::PracticeOrchestrator;
use crate::app::playback::PlaybackController;
use crate::app::recognition::SpeechRecognitionAdapter;
use crate::domain::{AppConfig, ClipRegistry, EnvironmentProfile, PracticeError};
use crate::infrastructure::init_logging;
use crate::ports::{AudioOutput, ConfigStore, MediaDevices, SpeechRecognizer, SpeechSynthesizer};

/// Port implementations the practice subsystem runs on.
///
/// Speech engines are always supplied by the host; microphone and speaker
/// default to cpal.
#[derive(Clone)]
pub struct PracticeBackends {
    pub media: Arc<dyn MediaDevices>,
    pub output: Arc<dyn AudioOutput>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
}

impl PracticeBackends {
    /// cpal microphone and speaker with host-supplied speech engines.
    pub fn with_cpal(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        recognizer: Arc<dyn SpeechRecognizer>,
    ) -> Self {
        Self {
            media: Arc::new(CpalMediaDevices::new()),
            output: Arc::new(CpalAudioOutput::new()),
            synthesizer,
            recognizer,
        }
    }
}

/// Application controller that orchestrates initialization and manages global state.
pub struct AppController {
    config: RwLock<AppConfig>,
    config_store: Arc<dyn ConfigStore>,
    profile: EnvironmentProfile,
    orchestrator: Arc<PracticeOrchestrator>,
    _log_guard: Option<WorkerGuard>,
}

impl AppController {
    /// Load configuration from the OS data directory, start logging and
    /// wire the practice subsystem.
    pub fn new(backends: PracticeBackends) -> Result<Self, PracticeError> {
        let store = Arc::new(TomlConfigStore::new()?);
        Self::with_store(store, backends)
    }

    pub fn with_store(
        config_store: Arc<dyn ConfigStore>,
        backends: PracticeBackends,
    ) -> Result<Self, PracticeError> {
        let config = config_store.load()?;

        let log_guard = init_logging(&config_store.logs_dir(), &config.logging)?;

        info!("Speech practice starting up");

        let profile = EnvironmentProfile::detect(
            config.environment.user_agent.as_deref(),
            config.environment.force_embedded,
        );
        let orchestrator = Arc::new(Self::wire(&config, profile, backends));

        info!(
            tier = ?profile.tier(),
            locale = ?config.practice.locale,
            voice_auto_play = config.practice.voice_auto_play,
            "AppController initialized"
        );

        Ok(Self {
            config: RwLock::new(config),
            config_store,
            profile,
            orchestrator,
            _log_guard: log_guard,
        })
    }

    fn wire(config: &AppConfig, profile: EnvironmentProfile, backends: PracticeBackends) -> PracticeOrchestrator {
        let clips = Arc::new(ClipRegistry::new(config.practice.max_clip_urls));
        let capture = Arc::new(AudioCaptureManager::new(
            backends.media,
            Arc::clone(&backends.output),
            clips,
            profile,
            config.capture.clone(),
        ));
        let recognition = Arc::new(SpeechRecognitionAdapter::new(backends.recognizer));
        let playback = Arc::new(PlaybackController::new(
            backends.synthesizer,
            backends.output,
            profile,
            &config.playback,
        ));
        PracticeOrchestrator::new(
            capture,
            recognition,
            playback,
            config.recognition.clone(),
            config.practice.clone(),
        )
    }

    pub fn orchestrator(&self) -> Arc<PracticeOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn profile(&self) -> EnvironmentProfile {
        self.profile
    }

    /// Get the current configuration.
    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Persist a new configuration.
    ///
    /// Thresholds and locale apply to a practice subsystem built after the
    /// next restart; the running one keeps the values it was wired with.
    pub fn update_config(&self, config: AppConfig) -> Result<(), PracticeError> {
        self.config_store.save(&config)?;
        *self.config.write() = config;
        info!("Configuration updated");
        Ok(())
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> String {
        self.config_store.data_dir().to_string_lossy().to_string()
    }

    /// Get the logs directory path.
    pub fn logs_dir(&self) -> String {
        self.config_store.logs_dir().to_string_lossy().to_string()
    }

    /// Get the config file path.
    pub fn config_path(&self) -> String {
        self.config_store.config_path().to_string_lossy().to_string()
    }
}
