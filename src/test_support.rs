//! Scripted port doubles for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

use crate::domain::{
    MediaConstraints, OutputChain, PermissionState, PracticeError, RecognitionConfig,
};
use crate::infrastructure::wav;
use crate::ports::{
    AudioOutput, MediaAccessError, MediaDevices, MediaErrorKind, MediaStream, PcmFrame,
    RecognizerEvent, SpeechRecognizer, SpeechSynthesizer, SynthesizedSpeech,
};

pub(crate) const SAMPLE_RATE: u32 = 16_000;

/// A constant-level frame of `len` samples.
pub(crate) fn frame(level: f32, len: usize) -> PcmFrame {
    PcmFrame {
        samples: vec![level; len].into(),
        sample_rate: SAMPLE_RATE,
    }
}

pub(crate) struct FakeMediaStream {
    id: String,
    active: AtomicBool,
    sender: broadcast::Sender<PcmFrame>,
}

impl FakeMediaStream {
    fn new(id: String) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            id,
            active: AtomicBool::new(true),
            sender,
        }
    }

    pub(crate) fn emit(&self, frame: PcmFrame) {
        if self.is_active() {
            let _ = self.sender.send(frame);
        }
    }
}

impl MediaStream for FakeMediaStream {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn subscribe(&self) -> broadcast::Receiver<PcmFrame> {
        self.sender.subscribe()
    }

    fn stop_tracks(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Microphone double. Failures are consumed one per call, in order.
#[derive(Default)]
pub(crate) struct FakeMediaDevices {
    delay: Duration,
    tone: bool,
    failures: Mutex<VecDeque<MediaErrorKind>>,
    calls: AtomicUsize,
    first_call: Mutex<Option<Instant>>,
    streams: Mutex<Vec<Arc<FakeMediaStream>>>,
}

impl FakeMediaDevices {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Streams feed a steady 10ms frame cadence until stopped.
    pub(crate) fn with_tone() -> Self {
        Self {
            tone: true,
            ..Self::default()
        }
    }

    pub(crate) fn fail_next(&self, kind: MediaErrorKind, times: usize) {
        self.failures.lock().extend(std::iter::repeat(kind).take(times));
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn first_call_at(&self) -> Option<Instant> {
        *self.first_call.lock()
    }

    pub(crate) fn last_stream(&self) -> Option<Arc<FakeMediaStream>> {
        self.streams.lock().last().cloned()
    }

    pub(crate) fn active_streams(&self) -> usize {
        self.streams.lock().iter().filter(|s| s.is_active()).count()
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn get_user_media(
        &self,
        _constraints: &MediaConstraints,
    ) -> Result<Arc<dyn MediaStream>, MediaAccessError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.first_call.lock().get_or_insert_with(Instant::now);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(kind) = self.failures.lock().pop_front() {
            return Err(MediaAccessError::new(kind, "scripted failure"));
        }

        let stream = Arc::new(FakeMediaStream::new(format!("fake-{call}")));
        if self.tone {
            let feeder = Arc::clone(&stream);
            tokio::spawn(async move {
                while feeder.is_active() {
                    feeder.emit(frame(0.3, 160));
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            });
        }
        self.streams.lock().push(Arc::clone(&stream));
        Ok(stream)
    }

    async fn permission_state(&self) -> PermissionState {
        PermissionState::Prompt
    }
}

/// Speaker double. Graph playback lasts as long as the audio would.
pub(crate) struct FakeOutput {
    graph: Mutex<Vec<OutputChain>>,
    direct: Mutex<Vec<f32>>,
    graph_finished: Mutex<Option<Instant>>,
    fail_graph: AtomicBool,
    stops: watch::Sender<u64>,
}

impl Default for FakeOutput {
    fn default() -> Self {
        let (stops, _) = watch::channel(0);
        Self {
            graph: Mutex::new(Vec::new()),
            direct: Mutex::new(Vec::new()),
            graph_finished: Mutex::new(None),
            fail_graph: AtomicBool::new(false),
            stops,
        }
    }
}

impl FakeOutput {
    pub(crate) fn fail_graph(&self) {
        self.fail_graph.store(true, Ordering::SeqCst);
    }

    pub(crate) fn graph_plays(&self) -> Vec<OutputChain> {
        self.graph.lock().clone()
    }

    pub(crate) fn direct_plays(&self) -> Vec<f32> {
        self.direct.lock().clone()
    }

    pub(crate) fn graph_finished_at(&self) -> Option<Instant> {
        *self.graph_finished.lock()
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    async fn play_graph(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        chain: OutputChain,
    ) -> Result<(), PracticeError> {
        if self.fail_graph.load(Ordering::SeqCst) {
            return Err(PracticeError::Playback("graph unavailable".to_string()));
        }
        self.graph.lock().push(chain);

        let mut stopped = self.stops.subscribe();
        let duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate.max(1) as f64);
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = stopped.changed() => {}
        }
        *self.graph_finished.lock() = Some(Instant::now());
        Ok(())
    }

    async fn play_direct(&self, _clip: &[u8], volume: f32) -> Result<(), PracticeError> {
        self.direct.lock().push(volume);
        Ok(())
    }

    fn stop(&self) {
        self.stops.send_modify(|n| *n += 1);
    }
}

/// Text-to-speech double producing a WAV tone.
pub(crate) struct FakeSynthesizer {
    payload: Option<Vec<u8>>,
    duration: Duration,
}

impl Default for FakeSynthesizer {
    fn default() -> Self {
        Self::with_duration(Duration::from_millis(50))
    }
}

impl FakeSynthesizer {
    pub(crate) fn with_duration(duration: Duration) -> Self {
        Self {
            payload: None,
            duration,
        }
    }

    /// Always return these bytes, playable or not.
    pub(crate) fn returning(bytes: Vec<u8>) -> Self {
        Self {
            payload: Some(bytes),
            duration: Duration::ZERO,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, _text: &str, _lang: &str) -> Result<SynthesizedSpeech, PracticeError> {
        let bytes = match &self.payload {
            Some(bytes) => bytes.clone(),
            None => {
                let len = (self.duration.as_secs_f64() * SAMPLE_RATE as f64) as usize;
                wav::encode_wav(&vec![0.2; len], SAMPLE_RATE)?
            }
        };
        Ok(SynthesizedSpeech {
            bytes,
            mime_type: wav::WAV_MIME.to_string(),
        })
    }
}

/// Recognizer double replaying `(delay_ms, event)` pairs after each start.
/// Delays are relative to the previous event.
pub(crate) struct FakeRecognizer {
    script: Vec<(u64, RecognizerEvent)>,
    sender: Mutex<Option<mpsc::UnboundedSender<RecognizerEvent>>>,
    start_error: Mutex<Option<PracticeError>>,
    start_delay: Mutex<Duration>,
    ends_on_stop: AtomicBool,
    end_delay: Mutex<Duration>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    aborts: AtomicUsize,
}

impl FakeRecognizer {
    pub(crate) fn scripted(script: Vec<(u64, RecognizerEvent)>) -> Self {
        Self {
            script,
            sender: Mutex::new(None),
            start_error: Mutex::new(None),
            start_delay: Mutex::new(Duration::ZERO),
            ends_on_stop: AtomicBool::new(true),
            end_delay: Mutex::new(Duration::ZERO),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail_start(&self, err: PracticeError) {
        *self.start_error.lock() = Some(err);
    }

    /// Delay before `start` resolves, like a slow engine spin-up.
    pub(crate) fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock() = delay;
    }

    pub(crate) fn set_ends_on_stop(&self, ends: bool) {
        self.ends_on_stop.store(ends, Ordering::SeqCst);
    }

    pub(crate) fn set_end_delay(&self, delay: Duration) {
        *self.end_delay.lock() = delay;
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub(crate) fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn start(
        &self,
        _config: &RecognitionConfig,
    ) -> Result<mpsc::UnboundedReceiver<RecognizerEvent>, PracticeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.start_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.start_error.lock().take() {
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let script = self.script.clone();
        let feeder = tx.clone();
        tokio::spawn(async move {
            for (delay_ms, event) in script {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if feeder.send(event).is_err() {
                    break;
                }
            }
        });
        *self.sender.lock() = Some(tx);
        Ok(rx)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if !self.ends_on_stop.load(Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.sender.lock().take() {
            let delay = *self.end_delay.lock();
            if delay.is_zero() {
                let _ = tx.send(RecognizerEvent::Ended);
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(RecognizerEvent::Ended);
                });
            }
        }
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().take();
    }
}
