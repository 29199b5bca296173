use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::adapters::audio_cpal::device_support::resample;
use crate::domain::{OutputChain, PracticeError};
use crate::infrastructure::wav;
use crate::ports::AudioOutput;

type RingConsumer = ringbuf::HeapCons<f32>;

/// How often the playback thread checks for completion or interruption.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn playback_error(context: &str, err: impl std::fmt::Display) -> PracticeError {
    PracticeError::Playback(format!("{context}: {err}"))
}

/// Build an output stream that drains `consumer`, duplicating mono samples
/// across channels and raising `drained` once the ring runs dry.
fn open_output(
    mut consumer: RingConsumer,
    drained: Arc<AtomicBool>,
) -> Result<(Stream, u32), PracticeError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PracticeError::Playback("No default output device available".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| playback_error("Failed to get default output config", e))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = config.channels as usize;

    let mut fill = move |out: &mut [f32]| {
        for frame in out.chunks_mut(channels.max(1)) {
            let sample = consumer.try_pop().unwrap_or(0.0);
            frame.fill(sample);
        }
        if consumer.is_empty() {
            drained.store(true, Ordering::SeqCst);
        }
    };
    let on_error = |err: cpal::StreamError| error!(?err, "Output stream error");

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| fill(data),
            on_error,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    fill(&mut scratch);
                    for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                        *out = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                    }
                },
                on_error,
                None,
            )
        }
        other => {
            return Err(PracticeError::Playback(format!(
                "Unsupported output sample format: {other:?}"
            )))
        }
    }
    .map_err(|e| playback_error("Failed to build output stream", e))?;

    stream
        .play()
        .map_err(|e| playback_error("Failed to start output stream", e))?;
    Ok((stream, config.sample_rate.0))
}

/// cpal-backed speaker output.
///
/// Each playback runs on its own thread that owns the non-`Send` stream and
/// reports completion through a oneshot channel.
pub struct CpalAudioOutput {
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl CpalAudioOutput {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    async fn play_samples(&self, samples: Vec<f32>, sample_rate: u32) -> Result<(), PracticeError> {
        let stop = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self.current.lock().replace(Arc::clone(&stop)) {
            previous.store(true, Ordering::SeqCst);
        }

        let (done_tx, done_rx) = oneshot::channel();
        let thread_stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let _ = done_tx.send(run_playback(samples, sample_rate, &thread_stop));
            })
            .map_err(|e| playback_error("Failed to spawn playback thread", e))?;

        let result = done_rx
            .await
            .map_err(|_| PracticeError::Playback("Playback thread exited unexpectedly".to_string()))?;

        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &stop)) {
            *current = None;
        }
        result
    }
}

impl Default for CpalAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

fn run_playback(samples: Vec<f32>, sample_rate: u32, stop: &AtomicBool) -> Result<(), PracticeError> {
    let drained = Arc::new(AtomicBool::new(false));
    // The device rate is only known once the stream exists, so size the ring
    // for the worst case and fill it after opening.
    let ring_capacity = samples.len().max(1) * 8;
    let ring = HeapRb::<f32>::new(ring_capacity);
    let (mut producer, consumer) = ring.split();

    let (stream, device_rate) = open_output(consumer, Arc::clone(&drained))?;
    let resampled = resample(&samples, sample_rate, device_rate);
    let pushed = producer.push_slice(&resampled);
    if pushed < resampled.len() {
        debug!(dropped = resampled.len() - pushed, "Playback ring full, truncating");
    }
    drained.store(false, Ordering::SeqCst);
    info!(samples = pushed, device_rate, "Playback started");

    while !drained.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);
    }
    drop(stream);
    debug!(interrupted = stop.load(Ordering::SeqCst), "Playback finished");
    Ok(())
}

#[async_trait]
impl AudioOutput for CpalAudioOutput {
    async fn play_graph(
        &self,
        mut samples: Vec<f32>,
        sample_rate: u32,
        chain: OutputChain,
    ) -> Result<(), PracticeError> {
        chain.process(&mut samples, sample_rate);
        self.play_samples(samples, sample_rate).await
    }

    async fn play_direct(&self, clip: &[u8], volume: f32) -> Result<(), PracticeError> {
        let (mut samples, sample_rate) = wav::decode_wav(clip)
            .map_err(|e| playback_error("Clip is not playable", e))?;
        let volume = volume.clamp(0.0, 1.0);
        for s in samples.iter_mut() {
            *s *= volume;
        }
        self.play_samples(samples, sample_rate).await
    }

    fn stop(&self) {
        if let Some(current) = self.current.lock().take() {
            current.store(true, Ordering::SeqCst);
        }
    }
}
