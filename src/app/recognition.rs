use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{
    align, AlignmentResult, PracticeError, RecognitionConfig, RecognitionOutcome,
    RecognitionSnapshot, StopReason,
};
use crate::ports::{RecognizerEvent, SpeechRecognizer};

type Settlement = Option<(u64, RecognitionOutcome)>;

/// Everything a running session needs, detached from the adapter so the
/// session task can be `'static`.
#[derive(Clone)]
struct SessionContext {
    recognizer: Arc<dyn SpeechRecognizer>,
    state: Arc<Mutex<RecognitionSnapshot>>,
    generation: Arc<AtomicU64>,
    outcome: Arc<watch::Sender<Settlement>>,
}

impl SessionContext {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Record the outcome unless the session has been superseded.
    fn settle(&self, generation: u64, outcome: RecognitionOutcome) {
        let mut state = self.state.lock();
        if !self.is_current(generation) {
            debug!(generation, "Discarding stale recognition outcome");
            return;
        }
        state.listening = false;
        state.processing = false;
        match &outcome {
            Ok(transcript) => state.transcript = transcript.clone(),
            Err(err) => state.error = Some(err.clone()),
        }
        self.outcome.send_replace(Some((generation, outcome)));
    }
}

/// Wraps a streaming recognizer with silence, grace and safety timers and
/// turns its event stream into a single settled outcome per session.
pub struct SpeechRecognitionAdapter {
    ctx: SessionContext,
    control: Mutex<Option<mpsc::UnboundedSender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechRecognitionAdapter {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            ctx: SessionContext {
                recognizer,
                state: Arc::new(Mutex::new(RecognitionSnapshot::default())),
                generation: Arc::new(AtomicU64::new(0)),
                outcome: Arc::new(outcome),
            },
            control: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Start a new session, replacing any previous one.
    pub async fn start(&self, config: RecognitionConfig) -> Result<(), PracticeError> {
        self.teardown();
        let generation = self.ctx.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.ctx.state.lock() = RecognitionSnapshot {
            config: Some(config.clone()),
            ..RecognitionSnapshot::default()
        };
        // Installed before the engine starts so an early stop() is queued.
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        *self.control.lock() = Some(control_tx);

        let events = match self.ctx.recognizer.start(&config).await {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "Recognizer failed to start");
                self.drop_control(generation);
                self.ctx.settle(generation, Err(err.clone()));
                return Err(err);
            }
        };
        if !self.ctx.is_current(generation) {
            self.ctx.recognizer.abort();
            return Err(PracticeError::Cancelled);
        }
        self.ctx.state.lock().listening = true;

        info!(
            generation,
            lang = %config.lang,
            silence_ms = config.silence_threshold_ms,
            safety_ms = config.safety_timeout_ms,
            "Recognition started"
        );
        let ctx = self.ctx.clone();
        *self.task.lock() = Some(tokio::spawn(run_session(ctx, generation, config, events, control_rx)));
        Ok(())
    }

    /// Ask the recognizer to stop and deliver its final result.
    pub fn stop(&self) {
        match self.control.lock().as_ref() {
            Some(control) => {
                let _ = control.send(());
            }
            None => debug!("Recognition stop ignored: no active session"),
        }
    }

    /// Abandon the current session and clear all observable state.
    pub fn reset(&self) {
        self.teardown();
        let mut state = self.ctx.state.lock();
        let generation = self.ctx.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *state = RecognitionSnapshot::default();
        self.ctx
            .outcome
            .send_replace(Some((generation, Err(PracticeError::Cancelled))));
    }

    fn drop_control(&self, generation: u64) {
        let mut control = self.control.lock();
        if self.ctx.is_current(generation) {
            control.take();
        }
    }

    fn teardown(&self) {
        self.control.lock().take();
        if let Some(task) = self.task.lock().take() {
            if !task.is_finished() {
                task.abort();
                self.ctx.recognizer.abort();
            }
        }
    }

    /// Wait for the current session's outcome.
    pub async fn settled(&self) -> RecognitionOutcome {
        let generation = self.ctx.generation.load(Ordering::SeqCst);
        let mut rx = self.ctx.outcome.subscribe();
        loop {
            let latest = rx.borrow_and_update().clone();
            if let Some((settled, outcome)) = latest {
                if settled == generation {
                    return outcome;
                }
            }
            if !self.ctx.is_current(generation) || rx.changed().await.is_err() {
                return Err(PracticeError::Cancelled);
            }
        }
    }

    /// Align the current transcript against a target phrase.
    pub fn score(&self, target: &str) -> AlignmentResult {
        align(target, &self.ctx.state.lock().transcript)
    }

    pub fn snapshot(&self) -> RecognitionSnapshot {
        self.ctx.state.lock().clone()
    }
}

impl Drop for SpeechRecognitionAdapter {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn compose_transcript(finals: &str, interim: &str) -> String {
    match (finals.is_empty(), interim.is_empty()) {
        (_, true) => finals.to_string(),
        (true, false) => interim.to_string(),
        (false, false) => format!("{finals} {interim}"),
    }
}

async fn run_session(
    ctx: SessionContext,
    generation: u64,
    config: RecognitionConfig,
    mut events: mpsc::UnboundedReceiver<RecognizerEvent>,
    mut control: mpsc::UnboundedReceiver<()>,
) {
    let silence = Duration::from_millis(config.silence_threshold_ms);
    let quiet = tokio::time::sleep(Duration::from_millis(config.initial_grace_ms));
    let safety = tokio::time::sleep(Duration::from_millis(config.safety_timeout_ms));
    let stop_deadline = tokio::time::sleep(Duration::from_millis(config.stop_grace_ms));
    tokio::pin!(quiet, safety, stop_deadline);

    let mut finals = String::new();
    let mut interim = String::new();
    let mut heard = false;
    let mut stop_reason: Option<StopReason> = None;
    let mut error: Option<PracticeError> = None;

    let request_stop = |reason: StopReason, deadline: std::pin::Pin<&mut tokio::time::Sleep>| {
        info!(generation, ?reason, "Recognition stopping");
        ctx.recognizer.stop();
        deadline.reset(Instant::now() + Duration::from_millis(config.stop_grace_ms));
        let mut state = ctx.state.lock();
        if ctx.is_current(generation) {
            state.listening = false;
            state.processing = true;
        }
        Some(reason)
    };

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(RecognizerEvent::Started) => debug!(generation, "Recognizer started"),
                Some(RecognizerEvent::Transcript { text, is_final }) => {
                    let text = text.trim();
                    if is_final {
                        if !text.is_empty() {
                            if !finals.is_empty() {
                                finals.push(' ');
                            }
                            finals.push_str(text);
                        }
                        interim.clear();
                    } else if config.interim_results {
                        interim = text.to_string();
                    }
                    heard |= !text.is_empty();

                    {
                        let mut state = ctx.state.lock();
                        if ctx.is_current(generation) {
                            state.transcript = compose_transcript(&finals, &interim);
                        }
                    }

                    if stop_reason.is_none() && heard {
                        quiet.as_mut().reset(Instant::now() + silence);
                    }
                }
                Some(RecognizerEvent::SpeechEnded) => debug!(generation, "Recognizer reported end of speech"),
                Some(RecognizerEvent::Error { kind, message }) => {
                    let err = RecognizerEvent::into_error(kind, message);
                    warn!(generation, error = %err, "Recognizer error");
                    if error.is_none() || err != PracticeError::Cancelled {
                        error = Some(err);
                    }
                }
                Some(RecognizerEvent::Ended) | None => {
                    stop_reason.get_or_insert(StopReason::Recognizer);
                    break;
                }
            },
            _ = &mut quiet, if stop_reason.is_none() => {
                let reason = if heard { StopReason::Silence } else { StopReason::InitialGrace };
                stop_reason = request_stop(reason, stop_deadline.as_mut());
            }
            _ = &mut safety, if stop_reason.is_none() => {
                stop_reason = request_stop(StopReason::Safety, stop_deadline.as_mut());
            }
            Some(()) = control.recv(), if stop_reason.is_none() => {
                stop_reason = request_stop(StopReason::Manual, stop_deadline.as_mut());
            }
            _ = &mut stop_deadline, if stop_reason.is_some() => {
                warn!(generation, "Recognizer did not end within the stop grace, aborting");
                ctx.recognizer.abort();
                break;
            }
        }
    }

    let transcript = compose_transcript(&finals, &interim);
    let outcome = match error {
        Some(PracticeError::RecognitionTimeout | PracticeError::Cancelled) if !transcript.is_empty() => {
            Ok(transcript)
        }
        Some(err) => Err(err),
        None if transcript.is_empty() && stop_reason != Some(StopReason::Manual) => {
            Err(PracticeError::RecognitionTimeout)
        }
        None => Ok(transcript),
    };
    info!(generation, ?stop_reason, ok = outcome.is_ok(), "Recognition settled");
    ctx.settle(generation, outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::RecognizerErrorKind;
    use crate::test_support::FakeRecognizer;

    fn config() -> RecognitionConfig {
        RecognitionConfig {
            silence_threshold_ms: 1_000,
            initial_grace_ms: 3_000,
            safety_timeout_ms: 10_000,
            stop_grace_ms: 2_000,
            ..RecognitionConfig::default()
        }
    }

    fn transcript(text: &str, is_final: bool) -> RecognizerEvent {
        RecognizerEvent::Transcript {
            text: text.to_string(),
            is_final,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_after_results_settles_transcript() {
        let recognizer = Arc::new(FakeRecognizer::scripted(vec![
            (100, RecognizerEvent::Started),
            (200, transcript("I love", true)),
            (100, transcript("app", false)),
            (100, transcript("apples", true)),
        ]));
        let adapter = SpeechRecognitionAdapter::new(recognizer.clone());

        adapter.start(config()).await.unwrap();
        assert!(adapter.snapshot().listening);

        let outcome = adapter.settled().await;
        assert_eq!(outcome, Ok("I love apples".to_string()));
        assert_eq!(recognizer.stops(), 1);

        let snapshot = adapter.snapshot();
        assert!(!snapshot.listening);
        assert!(!snapshot.processing);
        assert_eq!(adapter.score("I love oranges").matched_mask, vec![true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_between_stop_and_final_result() {
        let recognizer = Arc::new(FakeRecognizer::scripted(vec![(0, transcript("hello", true))]));
        recognizer.set_end_delay(Duration::from_millis(500));
        let adapter = SpeechRecognitionAdapter::new(recognizer.clone());

        adapter.start(config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let snapshot = adapter.snapshot();
        assert!(!snapshot.listening);
        assert!(snapshot.processing);

        assert_eq!(adapter.settled().await, Ok("hello".to_string()));
        assert!(!adapter.snapshot().processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_grace_without_speech_times_out() {
        let recognizer = Arc::new(FakeRecognizer::scripted(vec![(0, RecognizerEvent::Started)]));
        let adapter = SpeechRecognitionAdapter::new(recognizer.clone());

        let started = Instant::now();
        adapter.start(config()).await.unwrap();
        assert_eq!(adapter.settled().await, Err(PracticeError::RecognitionTimeout));
        assert!(started.elapsed() >= Duration::from_millis(3_000));
        assert_eq!(adapter.snapshot().error, Some(PracticeError::RecognitionTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_timeout_bounds_session() {
        // Interim results every 500ms keep the silence timer from firing
        let script = (0..40).map(|i| (500, transcript(&format!("word{i}"), false))).collect();
        let recognizer = Arc::new(FakeRecognizer::scripted(script));
        let adapter = SpeechRecognitionAdapter::new(recognizer.clone());

        let started = Instant::now();
        adapter.start(config()).await.unwrap();
        let outcome = adapter.settled().await.unwrap();
        assert!(!outcome.is_empty());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(10_000));
        assert!(elapsed < Duration::from_millis(11_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_recognizer_is_aborted() {
        let recognizer = Arc::new(FakeRecognizer::scripted(vec![(0, transcript("hi", true))]));
        recognizer.set_ends_on_stop(false);
        let adapter = SpeechRecognitionAdapter::new(recognizer.clone());

        adapter.start(config()).await.unwrap();
        assert_eq!(adapter.settled().await, Ok("hi".to_string()));
        assert_eq!(recognizer.aborts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognizer_error_maps_to_taxonomy() {
        let recognizer = Arc::new(FakeRecognizer::scripted(vec![
            (
                10,
                RecognizerEvent::Error {
                    kind: RecognizerErrorKind::NotAllowed,
                    message: "blocked".to_string(),
                },
            ),
            (0, RecognizerEvent::Ended),
        ]));
        let adapter = SpeechRecognitionAdapter::new(recognizer);

        adapter.start(config()).await.unwrap();
        assert!(matches!(
            adapter.settled().await,
            Err(PracticeError::PermissionDenied(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_stop() {
        let recognizer = Arc::new(FakeRecognizer::scripted(vec![(10, transcript("good morning", false))]));
        let adapter = SpeechRecognitionAdapter::new(recognizer.clone());

        adapter.start(config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        adapter.stop();
        assert_eq!(adapter.settled().await, Ok("good morning".to_string()));
        assert_eq!(recognizer.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_session() {
        let recognizer = Arc::new(FakeRecognizer::scripted(vec![(5_000, transcript("late", true))]));
        let adapter = Arc::new(SpeechRecognitionAdapter::new(recognizer.clone()));

        adapter.start(config()).await.unwrap();
        let waiter = tokio::spawn({
            let adapter = Arc::clone(&adapter);
            async move { adapter.settled().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        adapter.reset();

        assert_eq!(waiter.await.unwrap(), Err(PracticeError::Cancelled));
        assert_eq!(recognizer.aborts(), 1);
        tokio::time::sleep(Duration::from_millis(6_000)).await;
        assert_eq!(adapter.snapshot(), RecognitionSnapshot::default());
    }

    #[tokio::test]
    async fn test_start_failure_settles_with_error() {
        let recognizer = Arc::new(FakeRecognizer::scripted(Vec::new()));
        recognizer.fail_start(PracticeError::Recognition("engine unavailable".to_string()));
        let adapter = SpeechRecognitionAdapter::new(recognizer);

        assert!(adapter.start(config()).await.is_err());
        assert!(matches!(adapter.settled().await, Err(PracticeError::Recognition(_))));
        assert!(!adapter.snapshot().listening);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_starting_is_honoured() {
        let recognizer = Arc::new(FakeRecognizer::scripted(vec![(5_000, transcript("late", true))]));
        recognizer.set_start_delay(Duration::from_millis(200));
        let adapter = Arc::new(SpeechRecognitionAdapter::new(recognizer.clone()));

        let starting = tokio::spawn({
            let adapter = Arc::clone(&adapter);
            async move { adapter.start(config()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        adapter.stop();
        starting.await.unwrap().unwrap();

        let started = Instant::now();
        assert_eq!(adapter.settled().await, Ok(String::new()));
        assert!(started.elapsed() < Duration::from_millis(1_000));
        assert_eq!(recognizer.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognizer_ending_by_itself_without_speech_times_out() {
        let recognizer = Arc::new(FakeRecognizer::scripted(vec![(50, RecognizerEvent::Ended)]));
        let adapter = SpeechRecognitionAdapter::new(recognizer.clone());

        adapter.start(config()).await.unwrap();
        assert_eq!(adapter.settled().await, Err(PracticeError::RecognitionTimeout));
        assert_eq!(recognizer.stops(), 0);
    }

    #[test]
    fn test_compose_transcript() {
        assert_eq!(compose_transcript("", ""), "");
        assert_eq!(compose_transcript("a b", ""), "a b");
        assert_eq!(compose_transcript("", "c"), "c");
        assert_eq!(compose_transcript("a b", "c"), "a b c");
    }
}
