use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::app::capture::AudioCaptureManager;
use crate::app::playback::PlaybackController;
use crate::app::recognition::SpeechRecognitionAdapter;
use crate::domain::config::{PracticeConfig, RecognitionSettings};
use crate::domain::{
    align, CaptureEvent, PracticeError, PracticeEvent, PracticeMode, PracticePhase, PracticeSnapshot,
    PracticeTarget, RoundOutcome,
};

/// Resolves with the error of the first stream loss reported by capture.
async fn stream_lost(events: &mut broadcast::Receiver<CaptureEvent>) -> PracticeError {
    loop {
        match events.recv().await {
            Ok(CaptureEvent::StreamLost { error, .. }) => return error,
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct RoundState {
    phase: PracticePhase,
    mode: PracticeMode,
    target: Option<PracticeTarget>,
    outcome: Option<RoundOutcome>,
    task: Option<JoinHandle<()>>,
    presenting: Option<JoinHandle<()>>,
}

/// Sequences playback, capture and recognition into practice rounds.
///
/// Each round runs on its own task and carries a round number. Anything a
/// round produces after it has been cancelled or superseded is discarded.
pub struct PracticeOrchestrator {
    capture: Arc<AudioCaptureManager>,
    recognition: Arc<SpeechRecognitionAdapter>,
    playback: Arc<PlaybackController>,
    settings: RecognitionSettings,
    practice: PracticeConfig,
    state: Mutex<RoundState>,
    round: AtomicU64,
    event_sender: broadcast::Sender<PracticeEvent>,
    created: Instant,
}

impl PracticeOrchestrator {
    pub fn new(
        capture: Arc<AudioCaptureManager>,
        recognition: Arc<SpeechRecognitionAdapter>,
        playback: Arc<PlaybackController>,
        settings: RecognitionSettings,
        practice: PracticeConfig,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(64);
        Self {
            capture,
            recognition,
            playback,
            settings,
            practice,
            state: Mutex::new(RoundState::default()),
            round: AtomicU64::new(0),
            event_sender,
            created: Instant::now(),
        }
    }

    /// Shadow-reading: speak the target, then record the learner repeating it.
    ///
    /// Returns `false` when a round is already in flight.
    pub fn begin(self: &Arc<Self>, target: PracticeTarget) -> bool {
        self.launch(target, PracticeMode::ShadowReading)
    }

    /// Single-card: record the learner reading the target.
    ///
    /// Returns `false` when a round is already in flight.
    pub fn begin_recording(self: &Arc<Self>, target: PracticeTarget) -> bool {
        self.launch(target, PracticeMode::SingleCard)
    }

    fn launch(self: &Arc<Self>, target: PracticeTarget, mode: PracticeMode) -> bool {
        let mut state = self.state.lock();
        if !state.phase.can_begin() {
            warn!(phase = state.phase.label(), "Round start ignored: a round is in flight");
            return false;
        }

        if let Some(task) = state.presenting.take() {
            task.abort();
            self.playback.stop();
        }
        self.capture.clear();
        self.recognition.reset();

        let round = self.round.fetch_add(1, Ordering::SeqCst) + 1;
        state.mode = mode;
        state.target = Some(target.clone());
        state.outcome = None;
        let first = match mode {
            PracticeMode::ShadowReading => PracticePhase::Playing,
            PracticeMode::SingleCard => PracticePhase::Recording,
        };
        self.transition(&mut state, round, first);
        info!(round, ?mode, target = %target.text, "Practice round started");

        let this = Arc::clone(self);
        state.task = Some(tokio::spawn(async move { this.run_round(round, target, mode).await }));
        true
    }

    async fn run_round(self: Arc<Self>, round: u64, target: PracticeTarget, mode: PracticeMode) {
        if mode == PracticeMode::ShadowReading {
            if let Err(err) = self.playback.speak(&target.text).await {
                warn!(round, error = %err, "Playback failed, continuing to recording");
            }
            if !self.is_current(round) {
                return;
            }
            self.emit(PracticeEvent::PlaybackCompleted {
                round,
                at_ms: self.now_ms(),
            });
            if !self.advance(round, PracticePhase::Playing, PracticePhase::Recording) {
                return;
            }
        }

        let config = self.settings.for_phrase(&target.text);
        let mut capture_events = self.capture.subscribe();
        let (captured, recognizing) =
            tokio::join!(self.capture.start(), self.recognition.start(config));
        if !self.is_current(round) {
            return;
        }
        if let Err(err) = captured.and(recognizing) {
            self.capture.cancel();
            self.recognition.reset();
            self.finish(round, self.failed(err));
            return;
        }
        self.emit(PracticeEvent::RecordingStarted {
            round,
            at_ms: self.now_ms(),
        });

        let settled = tokio::select! {
            settled = self.recognition.settled() => settled,
            error = stream_lost(&mut capture_events) => {
                if self.is_current(round) {
                    warn!(round, error = %error, "Microphone lost during recording");
                    self.recognition.reset();
                    self.capture.cancel();
                    self.finish(round, self.failed(error));
                }
                return;
            }
        };
        if !self.is_current(round) {
            return;
        }
        self.emit(PracticeEvent::RecognitionSettled {
            round,
            at_ms: self.now_ms(),
        });
        if !self.advance(round, PracticePhase::Recording, PracticePhase::Processing) {
            return;
        }

        tokio::time::sleep(Duration::from_millis(self.practice.capture_stop_grace_ms)).await;
        if !self.is_current(round) {
            return;
        }
        let clip = match self.capture.stop().await {
            // The session already ended, e.g. the stream was lost during the grace sleep.
            Err(PracticeError::NotRecording) => Err(self
                .capture
                .snapshot()
                .error
                .unwrap_or(PracticeError::NotRecording)),
            clip => clip,
        };
        if !self.is_current(round) {
            return;
        }
        self.emit(PracticeEvent::CaptureStopped {
            round,
            at_ms: self.now_ms(),
        });

        let outcome = match (settled, clip) {
            (Err(err), _) | (Ok(_), Err(err)) => self.failed(err),
            (Ok(transcript), Ok(clip_url)) => {
                let alignment = align(&target.text, &transcript);
                let spans = alignment.spans(&target.text);
                RoundOutcome::Scored {
                    transcript,
                    alignment,
                    spans,
                    clip_url: Some(clip_url),
                }
            }
        };
        self.finish(round, outcome);
    }

    /// Stop listening early; the round continues to scoring.
    pub fn stop(&self) {
        let phase = self.state.lock().phase;
        if phase == PracticePhase::Recording {
            self.recognition.stop();
        } else {
            debug!(phase = phase.label(), "Manual stop ignored outside recording");
        }
    }

    /// Abandon the current round and release every device resource.
    pub fn cancel(&self) {
        self.abandon("cancel");
    }

    /// Move to the next card.
    pub fn next(&self) {
        self.abandon("next");
    }

    /// Move to the previous card.
    pub fn prev(&self) {
        self.abandon("prev");
    }

    /// Leave practice entirely.
    pub fn exit(&self) {
        self.abandon("exit");
        let mut state = self.state.lock();
        state.target = None;
        state.mode = PracticeMode::default();
    }

    fn abandon(&self, reason: &'static str) {
        let mut state = self.state.lock();
        let round = self.round.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = state.task.take() {
            task.abort();
        }
        if let Some(task) = state.presenting.take() {
            task.abort();
        }
        self.playback.stop();
        self.recognition.reset();
        self.capture.cancel();

        let from = state.phase;
        state.phase = PracticePhase::Idle;
        state.outcome = None;
        if from != PracticePhase::Idle {
            self.emit(PracticeEvent::PhaseChanged {
                round,
                from,
                to: PracticePhase::Idle,
                at_ms: self.now_ms(),
            });
        }
        if from.is_busy() {
            self.emit(PracticeEvent::Cancelled { round });
        }
        info!(round, reason, from = from.label(), "Practice round reset");
    }

    /// Show a card. Speaks it once when auto-play is enabled.
    ///
    /// Returns whether speech was started.
    pub fn present(self: &Arc<Self>, target: PracticeTarget) -> bool {
        let mut state = self.state.lock();
        if state.phase.is_busy() {
            warn!(phase = state.phase.label(), "Present ignored: a round is in flight");
            return false;
        }
        state.target = Some(target.clone());
        state.mode = PracticeMode::SingleCard;
        if !self.practice.voice_auto_play {
            return false;
        }

        if let Some(task) = state.presenting.take() {
            task.abort();
        }
        let playback = Arc::clone(&self.playback);
        state.presenting = Some(tokio::spawn(async move {
            if let Err(err) = playback.speak(&target.text).await {
                debug!(error = %err, "Card auto-play did not complete");
            }
        }));
        true
    }

    /// Replay the learner's last recording.
    pub async fn play_recording(&self) -> Result<(), PracticeError> {
        if self.state.lock().phase.is_busy() {
            return Err(PracticeError::Playback("a round is in flight".to_string()));
        }
        self.capture.play().await
    }

    /// Discard the last result and recording.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        if state.phase.is_busy() {
            debug!("Clear ignored: a round is in flight");
            return;
        }
        self.capture.clear();
        self.recognition.reset();
        let round = self.round.load(Ordering::SeqCst);
        state.outcome = None;
        if state.phase != PracticePhase::Idle {
            self.transition(&mut state, round, PracticePhase::Idle);
        }
    }

    pub fn snapshot(&self) -> PracticeSnapshot {
        let state = self.state.lock();
        let locale = self.practice.locale;
        PracticeSnapshot::compose(
            state.phase,
            state.mode,
            self.round.load(Ordering::SeqCst),
            state.target.clone(),
            state.outcome.clone(),
            self.playback.is_playing(),
            self.capture.snapshot(),
            self.recognition.snapshot(),
            |err| err.user_message(locale).to_string(),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PracticeEvent> {
        self.event_sender.subscribe()
    }

    pub fn phase(&self) -> PracticePhase {
        self.state.lock().phase
    }

    fn is_current(&self, round: u64) -> bool {
        self.round.load(Ordering::SeqCst) == round
    }

    fn advance(&self, round: u64, from: PracticePhase, to: PracticePhase) -> bool {
        let mut state = self.state.lock();
        if !self.is_current(round) || state.phase != from {
            return false;
        }
        self.transition(&mut state, round, to);
        true
    }

    fn transition(&self, state: &mut RoundState, round: u64, to: PracticePhase) {
        let from = state.phase;
        state.phase = to;
        debug!(round, from = from.label(), to = to.label(), "Phase changed");
        self.emit(PracticeEvent::PhaseChanged {
            round,
            from,
            to,
            at_ms: self.now_ms(),
        });
    }

    fn finish(&self, round: u64, outcome: RoundOutcome) {
        let mut state = self.state.lock();
        if !self.is_current(round) {
            return;
        }
        match &outcome {
            RoundOutcome::Scored { alignment, .. } => {
                info!(round, score = alignment.score, matched = alignment.matched_count(), "Round scored");
            }
            RoundOutcome::Failed { error, .. } => {
                warn!(round, error = %error, "Round failed");
            }
        }
        state.outcome = Some(outcome.clone());
        state.task = None;
        self.transition(&mut state, round, PracticePhase::Result);
        self.emit(PracticeEvent::RoundFinished { round, outcome });
    }

    fn failed(&self, error: PracticeError) -> RoundOutcome {
        let message = error.user_message(self.practice.locale).to_string();
        RoundOutcome::Failed { error, message }
    }

    fn emit(&self, event: PracticeEvent) {
        let _ = self.event_sender.send(event);
    }

    fn now_ms(&self) -> u64 {
        self.created.elapsed().as_millis() as u64
    }
}

impl Drop for PracticeOrchestrator {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        if let Some(task) = state.presenting.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::CaptureConfig;
    use crate::domain::{ClipRegistry, EnvironmentProfile};
    use crate::ports::{MediaStream, RecognizerErrorKind, RecognizerEvent};
    use crate::test_support::{FakeMediaDevices, FakeOutput, FakeRecognizer, FakeSynthesizer};

    struct Rig {
        orchestrator: Arc<PracticeOrchestrator>,
        devices: Arc<FakeMediaDevices>,
        output: Arc<FakeOutput>,
        recognizer: Arc<FakeRecognizer>,
        clips: Arc<ClipRegistry>,
    }

    fn settings() -> RecognitionSettings {
        RecognitionSettings {
            base_silence_ms: 100,
            silence_per_token_ms: 0,
            max_silence_ms: 100,
            initial_grace_ms: 1_000,
            base_safety_ms: 5_000,
            max_safety_ms: 5_000,
            stop_grace_ms: 500,
            ..RecognitionSettings::default()
        }
    }

    fn rig(script: Vec<(u64, RecognizerEvent)>, practice: PracticeConfig) -> Rig {
        let devices = Arc::new(FakeMediaDevices::with_tone());
        let output = Arc::new(FakeOutput::default());
        let recognizer = Arc::new(FakeRecognizer::scripted(script));
        let clips = Arc::new(ClipRegistry::new(4));
        let profile = EnvironmentProfile::desktop();

        let capture = Arc::new(AudioCaptureManager::new(
            devices.clone(),
            output.clone(),
            Arc::clone(&clips),
            profile,
            CaptureConfig {
                chunk_interval_ms: 20,
                stop_grace_ms: 20,
                ..CaptureConfig::default()
            },
        ));
        let recognition = Arc::new(SpeechRecognitionAdapter::new(recognizer.clone()));
        let playback = Arc::new(PlaybackController::new(
            Arc::new(FakeSynthesizer::with_duration(Duration::from_millis(150))),
            output.clone(),
            profile,
            &Default::default(),
        ));
        let orchestrator = Arc::new(PracticeOrchestrator::new(
            capture,
            recognition,
            playback,
            settings(),
            practice,
        ));
        Rig {
            orchestrator,
            devices,
            output,
            recognizer,
            clips,
        }
    }

    fn said(text: &str) -> Vec<(u64, RecognizerEvent)> {
        vec![
            (0, RecognizerEvent::Started),
            (
                80,
                RecognizerEvent::Transcript {
                    text: text.to_string(),
                    is_final: true,
                },
            ),
        ]
    }

    async fn wait_for_result(orchestrator: &PracticeOrchestrator) -> RoundOutcome {
        for _ in 0..300 {
            let snapshot = orchestrator.snapshot();
            if snapshot.phase == PracticePhase::Result {
                if let Some(outcome) = snapshot.outcome {
                    return outcome;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("round did not finish: {:?}", orchestrator.snapshot());
    }

    async fn wait_for_phase(orchestrator: &PracticeOrchestrator, phase: PracticePhase) {
        for _ in 0..300 {
            if orchestrator.phase() == phase {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("never reached {phase:?}");
    }

    #[tokio::test]
    async fn test_single_card_round_scores_transcript() {
        let rig = rig(said("I love oranges"), PracticeConfig::default());

        assert!(rig.orchestrator.begin_recording(PracticeTarget::new("I love apples")));
        let outcome = wait_for_result(&rig.orchestrator).await;

        match outcome {
            RoundOutcome::Scored {
                transcript,
                alignment,
                clip_url,
                ..
            } => {
                assert_eq!(transcript, "I love oranges");
                assert_eq!(alignment.matched_mask, vec![true, true, false]);
                assert!((alignment.score - 2.0 / 3.0).abs() < 1e-6);
                assert!(clip_url.is_some());
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let snapshot = rig.orchestrator.snapshot();
        assert!(!snapshot.recording);
        assert!(!snapshot.listening);
        assert!(snapshot.blob_url.is_some());
        assert!(snapshot.error.is_none());
        assert!(rig.output.graph_plays().is_empty());
    }

    #[tokio::test]
    async fn test_shadow_reading_records_after_playback() {
        let rig = rig(said("good morning"), PracticeConfig::default());
        let mut events = rig.orchestrator.subscribe();

        assert!(rig.orchestrator.begin(PracticeTarget::new("good morning")));
        let outcome = wait_for_result(&rig.orchestrator).await;
        assert_eq!(outcome.score(), Some(1.0));

        let playback_done = rig.output.graph_finished_at().expect("speech was played");
        let mic_opened = rig.devices.first_call_at().expect("microphone was opened");
        assert!(mic_opened >= playback_done);

        let mut order = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                PracticeEvent::PlaybackCompleted { at_ms, .. } => order.push(("playback", at_ms)),
                PracticeEvent::RecordingStarted { at_ms, .. } => order.push(("recording", at_ms)),
                PracticeEvent::RecognitionSettled { at_ms, .. } => order.push(("settled", at_ms)),
                PracticeEvent::CaptureStopped { at_ms, .. } => order.push(("stopped", at_ms)),
                _ => {}
            }
        }
        let names: Vec<_> = order.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["playback", "recording", "settled", "stopped"]);
        assert!(order.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[tokio::test]
    async fn test_begin_while_in_flight_is_ignored() {
        let rig = rig(said("one"), PracticeConfig::default());

        assert!(rig.orchestrator.begin(PracticeTarget::new("one")));
        assert!(!rig.orchestrator.begin(PracticeTarget::new("two")));
        assert!(!rig.orchestrator.begin_recording(PracticeTarget::new("three")));

        wait_for_result(&rig.orchestrator).await;
        assert_eq!(rig.recognizer.starts(), 1);
        assert_eq!(
            rig.orchestrator.snapshot().target,
            Some(PracticeTarget::new("one"))
        );
    }

    #[tokio::test]
    async fn test_cancel_during_processing_releases_everything() {
        let practice = PracticeConfig {
            capture_stop_grace_ms: 2_000,
            ..PracticeConfig::default()
        };
        let rig = rig(said("hello"), practice);
        let baseline = rig.clips.outstanding();
        let mut events = rig.orchestrator.subscribe();

        assert!(rig.orchestrator.begin_recording(PracticeTarget::new("hello")));
        wait_for_phase(&rig.orchestrator, PracticePhase::Processing).await;
        let stream = rig.devices.last_stream().expect("stream acquired");
        assert!(stream.is_active());

        rig.orchestrator.cancel();
        assert_eq!(rig.orchestrator.phase(), PracticePhase::Idle);
        assert!(!stream.is_active());
        assert_eq!(rig.clips.outstanding(), baseline);

        tokio::time::sleep(Duration::from_millis(100)).await;
        rig.orchestrator.cancel();
        let snapshot = rig.orchestrator.snapshot();
        assert_eq!(snapshot.phase, PracticePhase::Idle);
        assert!(snapshot.outcome.is_none());
        assert!(!snapshot.recording && !snapshot.processing && !snapshot.listening);

        let mut cancelled = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                PracticeEvent::RoundFinished { .. } => panic!("cancelled round finished"),
                PracticeEvent::Cancelled { .. } => cancelled += 1,
                _ => {}
            }
        }
        assert_eq!(cancelled, 1);
    }

    #[tokio::test]
    async fn test_lost_microphone_fails_round() {
        let rig = rig(vec![(0, RecognizerEvent::Started)], PracticeConfig::default());

        assert!(rig.orchestrator.begin_recording(PracticeTarget::new("hello")));
        wait_for_phase(&rig.orchestrator, PracticePhase::Recording).await;
        let stream = loop {
            if let Some(stream) = rig.devices.last_stream() {
                break stream;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.stop_tracks();

        let outcome = wait_for_result(&rig.orchestrator).await;
        assert!(matches!(outcome.error(), Some(PracticeError::TransientAbort(_))));
        assert!(rig.recognizer.aborts() >= 1);
        let snapshot = rig.orchestrator.snapshot();
        assert!(!snapshot.recording && !snapshot.listening);
        assert_eq!(rig.clips.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_recognition_error_settles_as_failed_round() {
        let script = vec![(
            20,
            RecognizerEvent::Error {
                kind: RecognizerErrorKind::NotAllowed,
                message: "blocked".to_string(),
            },
        ), (0, RecognizerEvent::Ended)];
        let rig = rig(script, PracticeConfig::default());

        rig.orchestrator.begin_recording(PracticeTarget::new("hello"));
        let outcome = wait_for_result(&rig.orchestrator).await;
        assert!(matches!(outcome.error(), Some(PracticeError::PermissionDenied(_))));

        let snapshot = rig.orchestrator.snapshot();
        assert!(snapshot.error_message.is_some());
        assert!(!snapshot.recording);
        assert!(!rig.devices.last_stream().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_capture_failure_settles_as_failed_round() {
        let rig = rig(said("hello"), PracticeConfig::default());
        rig.devices.fail_next(crate::ports::MediaErrorKind::NotFound, 1);

        rig.orchestrator.begin_recording(PracticeTarget::new("hello"));
        let outcome = wait_for_result(&rig.orchestrator).await;
        assert!(matches!(outcome.error(), Some(PracticeError::DeviceNotFound(_))));
        assert!(rig.recognizer.aborts() >= 1);
        assert!(!rig.orchestrator.snapshot().listening);
    }

    #[tokio::test]
    async fn test_manual_stop_scores_partial_reading() {
        let script = vec![(
            20,
            RecognizerEvent::Transcript {
                text: "the quick".to_string(),
                is_final: false,
            },
        )];
        let rig = rig(script, PracticeConfig::default());
        let orchestrator = &rig.orchestrator;

        orchestrator.begin_recording(PracticeTarget::new("the quick brown fox"));
        wait_for_phase(orchestrator, PracticePhase::Recording).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        orchestrator.stop();

        let outcome = wait_for_result(orchestrator).await;
        let score = outcome.score().unwrap();
        assert!((score - 0.5).abs() < 1e-6);
        assert!(rig.recognizer.stops() >= 1);
    }

    #[tokio::test]
    async fn test_present_speaks_when_auto_play_enabled() {
        let quiet = rig(Vec::new(), PracticeConfig::default());
        assert!(!quiet.orchestrator.present(PracticeTarget::new("apple")));

        let rig = rig(
            Vec::new(),
            PracticeConfig {
                voice_auto_play: true,
                ..PracticeConfig::default()
            },
        );
        assert!(rig.orchestrator.present(PracticeTarget::new("apple")));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(rig.output.graph_plays().len(), 1);
        assert_eq!(rig.orchestrator.phase(), PracticePhase::Idle);
        assert_eq!(
            rig.orchestrator.snapshot().target,
            Some(PracticeTarget::new("apple"))
        );
    }

    #[tokio::test]
    async fn test_next_after_result_discards_recording() {
        let rig = rig(said("hello"), PracticeConfig::default());

        rig.orchestrator.begin_recording(PracticeTarget::new("hello"));
        wait_for_result(&rig.orchestrator).await;
        assert_eq!(rig.clips.outstanding(), 1);

        rig.orchestrator.next();
        assert_eq!(rig.clips.outstanding(), 0);
        assert_eq!(rig.orchestrator.phase(), PracticePhase::Idle);
        assert!(rig.orchestrator.snapshot().to_json().is_ok());
    }
}
