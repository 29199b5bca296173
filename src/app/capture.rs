use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::domain::capture::{rms_volume, waveform, WAVEFORM_BARS};
use crate::domain::config::CaptureConfig;
use crate::domain::{
    AtomicCaptureState, AudioClip, CaptureEvent, CaptureSnapshot, CaptureState, ClipRegistry,
    ClipUrl, EnvironmentProfile, MediaConstraints, PermissionState, PracticeError, RetryPolicy,
};
use crate::infrastructure::wav::{self, ClipInfo, WAV_MIME};
use crate::ports::{AudioOutput, MediaDevices, MediaStream};

/// Samples kept for level analysis (~128ms at 16kHz).
const ANALYSIS_WINDOW: usize = 2048;

/// The acquired stream together with the generation it was acquired in.
struct StreamSlot {
    stream: Arc<dyn MediaStream>,
    generation: u64,
}

struct Recorder {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<Vec<Vec<u8>>>,
    sample_rate: u32,
}

#[derive(Default)]
struct Session {
    stream: Option<StreamSlot>,
    generation: u64,
    recorder: Option<Recorder>,
    telemetry_task: Option<JoinHandle<()>>,
    keep_warm_task: Option<JoinHandle<()>>,
    clip_url: Option<ClipUrl>,
    error: Option<PracticeError>,
    permission: PermissionState,
    playing: bool,
}

#[derive(Default)]
struct Levels {
    volume: f32,
    waveform: [f32; WAVEFORM_BARS],
}

/// Stops tracks and clears the slot. Also cancels a pending keep-warm cleanup.
fn release_stream(session: &mut Session, events: &broadcast::Sender<CaptureEvent>) {
    if let Some(task) = session.keep_warm_task.take() {
        task.abort();
    }
    if let Some(slot) = session.stream.take() {
        slot.stream.stop_tracks();
        info!(stream = %slot.stream.id(), generation = slot.generation, "Microphone stream released");
        let _ = events.send(CaptureEvent::StreamReleased {
            generation: slot.generation,
        });
    }
}

/// Tear down a recording whose stream ended underneath it.
///
/// Returns `false` when the session already moved past the stream of
/// `generation`.
fn abandon_lost_stream(
    state: &AtomicCaptureState,
    session: &Mutex<Session>,
    events: &broadcast::Sender<CaptureEvent>,
    generation: u64,
) -> bool {
    let mut session = session.lock();
    let held = session.stream.as_ref().map(|s| s.generation);
    if held != Some(generation)
        || !state.compare_exchange(CaptureState::Recording, CaptureState::Idle)
    {
        return false;
    }

    if let Some(recorder) = session.recorder.take() {
        recorder.handle.abort();
    }
    session.telemetry_task.take();
    release_stream(&mut session, events);

    let error = PracticeError::TransientAbort("microphone stream ended during recording".to_string());
    warn!(generation, "Microphone stream lost while recording");
    session.error = Some(error.clone());
    let _ = events.send(CaptureEvent::StateChanged {
        from: CaptureState::Recording,
        to: CaptureState::Idle,
    });
    let _ = events.send(CaptureEvent::Error { error: error.clone() });
    let _ = events.send(CaptureEvent::StreamLost { generation, error });
    true
}

/// Returns an interrupted acquisition to Idle, unless a cancel has already
/// handed the state to a newer session.
struct AcquireGuard<'a> {
    manager: &'a AudioCaptureManager,
    epoch: u64,
    armed: bool,
}

impl Drop for AcquireGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.abandon_acquire(self.epoch);
        }
    }
}

/// Owns the microphone stream and the recording session built on top of it.
///
/// At most one session is in flight. Every exit path releases the stream,
/// except that a fragile embedded host keeps it warm for a bounded idle
/// window so the next session does not re-trigger a permission prompt.
pub struct AudioCaptureManager {
    devices: Arc<dyn MediaDevices>,
    output: Arc<dyn AudioOutput>,
    clips: Arc<ClipRegistry>,
    profile: EnvironmentProfile,
    retry: RetryPolicy,
    config: CaptureConfig,
    state: Arc<AtomicCaptureState>,
    session: Arc<Mutex<Session>>,
    levels: Arc<Mutex<Levels>>,
    event_sender: broadcast::Sender<CaptureEvent>,
    cancel_epoch: watch::Sender<u64>,
}

impl AudioCaptureManager {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        output: Arc<dyn AudioOutput>,
        clips: Arc<ClipRegistry>,
        profile: EnvironmentProfile,
        config: CaptureConfig,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(64);
        let (cancel_epoch, _) = watch::channel(0);
        let retry = RetryPolicy::for_profile(&profile);

        info!(
            tier = ?profile.tier(),
            max_attempts = retry.max_attempts,
            backoff_ms = retry.backoff.as_millis() as u64,
            "AudioCaptureManager initialized"
        );

        Self {
            devices,
            output,
            clips,
            profile,
            retry,
            config,
            state: Arc::new(AtomicCaptureState::default()),
            session: Arc::new(Mutex::new(Session::default())),
            levels: Arc::new(Mutex::new(Levels::default())),
            event_sender,
            cancel_epoch,
        }
    }

    /// Start a recording session.
    ///
    /// A call made while another session is acquiring, recording or
    /// finalizing is ignored.
    pub async fn start(&self) -> Result<(), PracticeError> {
        // State changes and cancel epochs move together under the session lock.
        let (current, epoch) = {
            let _session = self.session.lock();
            let current = self.state.load();
            if !current.can_start() || !self.state.compare_exchange(current, CaptureState::Acquiring) {
                warn!(state = ?current, "Capture start ignored: a session is already in flight");
                return Ok(());
            }
            (current, *self.cancel_epoch.borrow())
        };
        let mut guard = AcquireGuard {
            manager: self,
            epoch,
            armed: true,
        };
        self.emit_state(current, CaptureState::Acquiring);

        self.discard_clip();
        let permission = self.devices.permission_state().await;
        self.session.lock().permission = permission;

        let stream = match self.acquire_stream(epoch).await {
            Ok(stream) => stream,
            Err(err) => {
                if err != PracticeError::Cancelled && self.is_current(epoch) {
                    self.record_error(err.clone());
                }
                return Err(err);
            }
        };

        {
            let mut session = self.session.lock();
            if !self.is_current(epoch) {
                guard.armed = false;
                return Err(PracticeError::Cancelled);
            }
            let generation = session.stream.as_ref().map_or(0, |s| s.generation);
            session.recorder = Some(self.spawn_recorder(&stream));
            session.telemetry_task = Some(self.spawn_telemetry(&stream, generation));
            guard.armed = false;
            if self.state.compare_exchange(CaptureState::Acquiring, CaptureState::Recording) {
                self.emit_state(CaptureState::Acquiring, CaptureState::Recording);
            }
        }

        info!(stream = %stream.id(), sample_rate = stream.sample_rate(), "Recording started");
        Ok(())
    }

    /// Reuse a warm stream in a fragile host, otherwise acquire a fresh one
    /// under the environment's retry policy.
    /// Acquiring -> Idle, only while `epoch` is still current.
    fn abandon_acquire(&self, epoch: u64) {
        let _session = self.session.lock();
        if self.is_current(epoch)
            && self.state.compare_exchange(CaptureState::Acquiring, CaptureState::Idle)
        {
            self.emit_state(CaptureState::Acquiring, CaptureState::Idle);
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        *self.cancel_epoch.borrow() == epoch
    }

    async fn acquire_stream(&self, epoch: u64) -> Result<Arc<dyn MediaStream>, PracticeError> {
        {
            let mut session = self.session.lock();
            if self.profile.keeps_stream_warm() {
                if let Some(slot) = session.stream.as_ref().filter(|s| s.stream.is_active()) {
                    let stream = Arc::clone(&slot.stream);
                    let generation = slot.generation;
                    if let Some(task) = session.keep_warm_task.take() {
                        task.abort();
                    }
                    debug!(generation, "Reusing warm microphone stream");
                    let _ = self.event_sender.send(CaptureEvent::StreamAcquired {
                        generation,
                        reused: true,
                    });
                    return Ok(stream);
                }
            }
            release_stream(&mut session, &self.event_sender);
        }

        let constraints = MediaConstraints::for_profile(&self.profile);
        let mut cancel_rx = self.cancel_epoch.subscribe();
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.devices.get_user_media(&constraints).await {
                Ok(stream) => {
                    let mut session = self.session.lock();
                    if !self.is_current(epoch) {
                        stream.stop_tracks();
                        return Err(PracticeError::Cancelled);
                    }
                    release_stream(&mut session, &self.event_sender);
                    session.generation += 1;
                    let generation = session.generation;
                    session.stream = Some(StreamSlot {
                        stream: Arc::clone(&stream),
                        generation,
                    });
                    session.permission = PermissionState::Granted;
                    info!(stream = %stream.id(), generation, attempt, "Microphone stream acquired");
                    let _ = self.event_sender.send(CaptureEvent::StreamAcquired {
                        generation,
                        reused: false,
                    });
                    return Ok(stream);
                }
                Err(raw) => {
                    let err = PracticeError::from(raw);
                    if matches!(err, PracticeError::PermissionDenied(_)) {
                        self.session.lock().permission = PermissionState::Denied;
                    }
                    if err.is_terminal() {
                        warn!(attempt, error = %err, "Microphone unavailable");
                        return Err(err);
                    }
                    if !err.is_retryable(&self.profile) || attempt == max_attempts {
                        warn!(attempt, error = %err, "Microphone acquisition failed");
                        return Err(err);
                    }

                    warn!(
                        attempt,
                        max_attempts,
                        backoff_ms = self.retry.backoff.as_millis() as u64,
                        error = %err,
                        "Microphone acquisition failed, retrying"
                    );
                    let _ = self.event_sender.send(CaptureEvent::AcquireRetry {
                        attempt,
                        error: err,
                    });
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry.backoff) => {}
                        _ = cancel_rx.changed() => return Err(PracticeError::Cancelled),
                    }
                    if !self.is_current(epoch) {
                        return Err(PracticeError::Cancelled);
                    }
                }
            }
        }
        Err(PracticeError::TransientAbort("no acquisition attempts left".to_string()))
    }

    /// Collect frames into fixed-interval PCM16 chunks until stopped.
    ///
    /// After the stop signal the recorder keeps draining for the stop grace
    /// period, since trailing frames can arrive just after the signal.
    fn spawn_recorder(&self, stream: &Arc<dyn MediaStream>) -> Recorder {
        let mut frames = stream.subscribe();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let chunk_interval = Duration::from_millis(self.config.chunk_interval_ms.max(1));
        let grace = Duration::from_millis(self.config.stop_grace_ms);
        let events = self.event_sender.clone();

        let handle = tokio::spawn(async move {
            let mut chunks: Vec<Vec<u8>> = Vec::new();
            let mut pending: Vec<f32> = Vec::new();
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + chunk_interval, chunk_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let flush = |pending: &mut Vec<f32>, chunks: &mut Vec<Vec<u8>>| {
                if pending.is_empty() {
                    return;
                }
                let chunk = wav::encode_pcm16(pending);
                pending.zeroize();
                pending.clear();
                let _ = events.send(CaptureEvent::ChunkRecorded {
                    index: chunks.len(),
                    bytes: chunk.len(),
                });
                chunks.push(chunk);
            };

            loop {
                tokio::select! {
                    frame = frames.recv() => match frame {
                        Ok(frame) => pending.extend_from_slice(&frame.samples),
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "Recorder lagged behind stream"),
                        Err(RecvError::Closed) => break,
                    },
                    _ = ticker.tick() => flush(&mut pending, &mut chunks),
                    _ = &mut stop_rx => {
                        let deadline = tokio::time::sleep(grace);
                        tokio::pin!(deadline);
                        loop {
                            tokio::select! {
                                _ = &mut deadline => break,
                                frame = frames.recv() => match frame {
                                    Ok(frame) => pending.extend_from_slice(&frame.samples),
                                    Err(RecvError::Lagged(_)) => continue,
                                    Err(RecvError::Closed) => break,
                                },
                            }
                        }
                        break;
                    }
                }
            }

            flush(&mut pending, &mut chunks);
            debug!(chunks = chunks.len(), "Recorder flushed");
            chunks
        });

        Recorder {
            stop_tx,
            handle,
            sample_rate: stream.sample_rate(),
        }
    }

    /// Sample an independent analysis tap for volume and waveform.
    ///
    /// The tap also watches the stream: if it ends while the session is
    /// still recording, the session is torn down with a `TransientAbort`.
    fn spawn_telemetry(&self, stream: &Arc<dyn MediaStream>, generation: u64) -> JoinHandle<()> {
        let mut frames = stream.subscribe();
        let stream = Arc::clone(stream);
        let state = Arc::clone(&self.state);
        let session = Arc::clone(&self.session);
        let levels = Arc::clone(&self.levels);
        let events = self.event_sender.clone();
        let interval = Duration::from_millis(self.config.telemetry_interval_ms.max(1));
        let gain = self.config.visual_gain;

        tokio::spawn(async move {
            let mut window: VecDeque<f32> = VecDeque::with_capacity(ANALYSIS_WINDOW);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    frame = frames.recv() => match frame {
                        Ok(frame) => {
                            window.extend(frame.samples.iter().copied());
                            let excess = window.len().saturating_sub(ANALYSIS_WINDOW);
                            window.drain(..excess);
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                    _ = ticker.tick() => {
                        if !stream.is_active() {
                            break;
                        }
                        let samples = window.make_contiguous();
                        let volume = rms_volume(samples, gain);
                        let bars = waveform(samples, gain);
                        {
                            let mut levels = levels.lock();
                            levels.volume = volume;
                            levels.waveform = bars;
                        }
                        let _ = events.send(CaptureEvent::Level { volume });
                    }
                }
            }

            if abandon_lost_stream(&state, &session, &events, generation) {
                *levels.lock() = Levels::default();
            }
        })
    }

    /// Stop recording, validate the clip and publish its URL.
    pub async fn stop(&self) -> Result<ClipUrl, PracticeError> {
        let (epoch, recorder, telemetry) = {
            let mut session = self.session.lock();
            let current = self.state.load();
            if !current.can_stop() || !self.state.compare_exchange(current, CaptureState::Finalizing) {
                return Err(PracticeError::NotRecording);
            }
            (
                *self.cancel_epoch.borrow(),
                session.recorder.take(),
                session.telemetry_task.take(),
            )
        };
        self.emit_state(CaptureState::Recording, CaptureState::Finalizing);
        if let Some(task) = telemetry {
            task.abort();
        }
        self.reset_levels();

        let (chunks, sample_rate) = match recorder {
            Some(recorder) => {
                let _ = recorder.stop_tx.send(());
                match recorder.handle.await {
                    Ok(chunks) => (chunks, recorder.sample_rate),
                    Err(e) => {
                        debug!(error = %e, "Recorder task did not complete");
                        (Vec::new(), recorder.sample_rate)
                    }
                }
            }
            None => (Vec::new(), 0),
        };

        self.release_after_session();

        if !self.is_current(epoch) {
            return Err(PracticeError::Cancelled);
        }

        let result = match finalize_clip(chunks, sample_rate, &self.config).await {
            Ok(clip) => {
                let duration_secs = clip.duration_secs();
                let mut session = self.session.lock();
                if !self.is_current(epoch) {
                    return Err(PracticeError::Cancelled);
                }
                self.clips.create_url(clip).map(|url| {
                    session.clip_url = Some(url.clone());
                    (url, duration_secs)
                })
            }
            Err(err) => Err(err),
        };

        match result {
            Ok((url, duration_secs)) => {
                if self.state.compare_exchange(CaptureState::Finalizing, CaptureState::Stopped) {
                    self.emit_state(CaptureState::Finalizing, CaptureState::Stopped);
                }
                info!(url = %url, duration_secs, "Recording clip ready");
                let _ = self.event_sender.send(CaptureEvent::ClipReady {
                    url: url.clone(),
                    duration_secs,
                });
                Ok(url)
            }
            Err(err) => {
                warn!(error = %err, "Recording rejected");
                self.record_error(err.clone());
                if self.state.compare_exchange(CaptureState::Finalizing, CaptureState::Idle) {
                    self.emit_state(CaptureState::Finalizing, CaptureState::Idle);
                }
                Err(err)
            }
        }
    }

    /// Release the stream after a session, or keep it warm for the idle
    /// window when the host is fragile.
    fn release_after_session(&self) {
        let mut session = self.session.lock();
        let warm = self.profile.keeps_stream_warm()
            && session.stream.as_ref().is_some_and(|s| s.stream.is_active());
        if !warm {
            release_stream(&mut session, &self.event_sender);
            return;
        }

        let generation = session.stream.as_ref().map_or(0, |s| s.generation);
        let ttl = Duration::from_secs(self.config.keep_warm_secs);
        let shared = Arc::clone(&self.session);
        let events = self.event_sender.clone();
        if let Some(task) = session.keep_warm_task.take() {
            task.abort();
        }
        session.keep_warm_task = Some(tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut session = shared.lock();
            if session.stream.as_ref().map(|s| s.generation) == Some(generation) {
                debug!(generation, "Keep-warm window expired");
                session.keep_warm_task = None;
                release_stream(&mut session, &events);
            }
        }));
        debug!(generation, keep_warm_secs = self.config.keep_warm_secs, "Keeping microphone stream warm");
    }

    /// Replay the last published clip.
    pub async fn play(&self) -> Result<(), PracticeError> {
        let url = self
            .session
            .lock()
            .clip_url
            .clone()
            .ok_or_else(|| PracticeError::Playback("no recorded clip".to_string()))?;
        let clip = self
            .clips
            .resolve(&url)
            .ok_or_else(|| PracticeError::Playback("clip was revoked".to_string()))?;

        self.session.lock().playing = true;
        let result = self.output.play_direct(clip.bytes(), 1.0).await;
        self.session.lock().playing = false;
        result
    }

    /// Discard the recorded clip and any error.
    pub fn clear(&self) {
        self.discard_clip();
        self.session.lock().error = None;
        if self.state.compare_exchange(CaptureState::Stopped, CaptureState::Idle) {
            self.emit_state(CaptureState::Stopped, CaptureState::Idle);
        }
    }

    /// Force-release the microphone, ending any session that depends on it.
    pub fn clear_stream(&self) {
        let state = self.state.load();
        if state.is_transitioning() || state.can_stop() {
            self.cancel();
        } else {
            release_stream(&mut self.session.lock(), &self.event_sender);
        }
    }

    /// Abort everything in flight and release all resources. Idempotent.
    pub fn cancel(&self) {
        let previous = {
            let mut session = self.session.lock();
            self.cancel_epoch.send_modify(|epoch| *epoch += 1);
            if let Some(recorder) = session.recorder.take() {
                recorder.handle.abort();
            }
            if let Some(task) = session.telemetry_task.take() {
                task.abort();
            }
            release_stream(&mut session, &self.event_sender);
            if let Some(url) = session.clip_url.take() {
                self.clips.revoke(&url);
            }
            session.playing = false;

            let previous = self.state.load();
            self.state.store(CaptureState::Idle);
            previous
        };
        self.reset_levels();

        if previous != CaptureState::Idle {
            self.emit_state(previous, CaptureState::Idle);
            debug!(from = ?previous, "Capture session cancelled");
        }
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        let state = self.state.load();
        let session = self.session.lock();
        let levels = self.levels.lock();
        CaptureSnapshot {
            state,
            recording: state == CaptureState::Recording,
            playing: session.playing,
            volume: levels.volume,
            waveform: levels.waveform,
            clip_url: session.clip_url.clone(),
            mime_type: session.clip_url.as_ref().map(|_| WAV_MIME.to_string()),
            error: session.error.clone(),
            permission: session.permission,
            stream_active: session.stream.as_ref().is_some_and(|s| s.stream.is_active()),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state.load()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.event_sender.subscribe()
    }

    pub fn clip(&self) -> Option<Arc<AudioClip>> {
        let url = self.session.lock().clip_url.clone()?;
        self.clips.resolve(&url)
    }

    /// Generation of the currently held stream, if any.
    pub fn stream_generation(&self) -> Option<u64> {
        self.session.lock().stream.as_ref().map(|s| s.generation)
    }

    fn discard_clip(&self) {
        if let Some(url) = self.session.lock().clip_url.take() {
            self.clips.revoke(&url);
        }
    }

    fn record_error(&self, err: PracticeError) {
        self.session.lock().error = Some(err.clone());
        let _ = self.event_sender.send(CaptureEvent::Error { error: err });
    }

    fn reset_levels(&self) {
        *self.levels.lock() = Levels::default();
    }

    fn emit_state(&self, from: CaptureState, to: CaptureState) {
        let _ = self.event_sender.send(CaptureEvent::StateChanged { from, to });
    }
}

impl Drop for AudioCaptureManager {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Validate recorded chunks and assemble them into a playable clip.
async fn finalize_clip(
    mut chunks: Vec<Vec<u8>>,
    sample_rate: u32,
    config: &CaptureConfig,
) -> Result<AudioClip, PracticeError> {
    if chunks.len() > 2 && chunks.last().is_some_and(|c| c.len() < config.min_chunk_bytes) {
        if let Some(mut tail) = chunks.pop() {
            debug!(bytes = tail.len(), "Dropping undersized trailing chunk");
            tail.zeroize();
        }
    }

    let total: usize = chunks.iter().map(Vec::len).sum();
    if total < config.min_total_bytes || sample_rate == 0 {
        chunks.zeroize();
        return Err(PracticeError::EmptyOrTooShortRecording { bytes: total });
    }

    let assembled = wav::assemble_wav(&chunks, sample_rate);
    chunks.zeroize();
    let bytes = assembled?;

    let limit = Duration::from_millis(config.verify_timeout_ms);
    let (bytes, info) = verify_clip(bytes, limit, wav::verify_wav).await?;
    if info.duration_secs <= config.min_duration_secs {
        return Err(PracticeError::DecodeOrValidationFailure(format!(
            "clip duration {:.3}s is too short",
            info.duration_secs
        )));
    }
    Ok(AudioClip::new(bytes, WAV_MIME, info.duration_secs))
}

/// Decode-check a clip on the blocking pool, bounded by `limit`.
async fn verify_clip<F>(
    bytes: Vec<u8>,
    limit: Duration,
    check: F,
) -> Result<(Vec<u8>, ClipInfo), PracticeError>
where
    F: FnOnce(&[u8]) -> Result<ClipInfo, PracticeError> + Send + 'static,
{
    let checked = tokio::time::timeout(
        limit,
        tokio::task::spawn_blocking(move || {
            let info = check(&bytes);
            (bytes, info)
        }),
    )
    .await;

    match checked {
        Err(_) => Err(PracticeError::DecodeOrValidationFailure(
            "timed out checking clip".to_string(),
        )),
        Ok(Err(join)) => Err(PracticeError::DecodeOrValidationFailure(join.to_string())),
        Ok(Ok((bytes, info))) => info.map(|info| (bytes, info)),
    }
}
