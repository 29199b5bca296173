use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::domain::{MediaConstraints, PermissionState};
use crate::ports::{MediaAccessError, MediaDevices, MediaErrorKind, MediaStream, PcmFrame};

/// Frames buffered per subscriber before it starts lagging.
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Rate frames are delivered at when the constraints leave it open. Clip
/// size thresholds and the level analysis window assume it.
const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Device helpers shared by the input and output adapters.
pub(crate) mod device_support {
    use super::*;

    pub fn input_device(preferred: Option<&str>) -> Result<Device, MediaAccessError> {
        let host = cpal::default_host();

        if let Some(name) = preferred {
            let devices = host.input_devices().map_err(|e| {
                MediaAccessError::new(MediaErrorKind::NotReadable, format!("Failed to enumerate devices: {e}"))
            })?;
            for device in devices {
                if device.name().is_ok_and(|n| n == name) {
                    return Ok(device);
                }
            }
            warn!(device = %name, "Preferred input device not found, falling back to default");
        }

        host.default_input_device().ok_or_else(|| {
            MediaAccessError::new(MediaErrorKind::NotFound, "No default input device available")
        })
    }

    pub fn build_error(err: BuildStreamError) -> MediaAccessError {
        let kind = match err {
            BuildStreamError::DeviceNotAvailable => MediaErrorKind::NotFound,
            BuildStreamError::StreamConfigNotSupported | BuildStreamError::InvalidArgument => {
                MediaErrorKind::Overconstrained
            }
            _ => MediaErrorKind::NotReadable,
        };
        MediaAccessError::new(kind, format!("Failed to build stream: {err}"))
    }

    /// Average interleaved channels down to mono.
    pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
        if channels <= 1 {
            return data.to_vec();
        }
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }

    /// Linear-interpolation resampler.
    pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
        if from_rate == to_rate || samples.is_empty() || to_rate == 0 {
            return samples.to_vec();
        }

        let ratio = from_rate as f64 / to_rate as f64;
        let output_len = (samples.len() as f64 / ratio).ceil() as usize;
        let mut output = Vec::with_capacity(output_len);

        for i in 0..output_len {
            let src_pos = i as f64 * ratio;
            let src_idx = src_pos.floor() as usize;
            let frac = src_pos.fract() as f32;

            let sample = match (samples.get(src_idx), samples.get(src_idx + 1)) {
                (Some(&s0), Some(&s1)) => s0 + (s1 - s0) * frac,
                (Some(&s0), None) => s0,
                _ => 0.0,
            };
            output.push(sample);
        }
        output
    }
}

use device_support::{build_error, downmix, input_device, resample};

/// Rate frames are published at for these constraints.
fn frame_rate(constraints: &MediaConstraints) -> u32 {
    constraints.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
}

fn wants_voice_processing(constraints: &MediaConstraints) -> bool {
    [
        constraints.echo_cancellation,
        constraints.noise_suppression,
        constraints.auto_gain_control,
    ]
    .iter()
    .any(|flag| flag.unwrap_or(false))
}

/// Open the device and build a stream that broadcasts mono frames at `target_rate`.
///
/// A stream error marks the stream inactive and signals `fault`, which makes
/// the owning thread drop the stream and with it the only frame sender.
fn open_input(
    preferred: Option<&str>,
    target_rate: u32,
    sender: broadcast::Sender<PcmFrame>,
    active: Arc<AtomicBool>,
    fault: std_mpsc::Sender<()>,
) -> Result<(Stream, String), MediaAccessError> {
    let device = input_device(preferred)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let supported = device.default_input_config().map_err(|e| {
        MediaAccessError::new(MediaErrorKind::NotReadable, format!("Failed to get default config: {e}"))
    })?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = config.channels as usize;
    let device_rate = config.sample_rate.0;

    debug!(device = %name, device_rate, channels, format = ?sample_format, "Opening input stream");

    let publish = move |mono: Vec<f32>| {
        let samples = resample(&mono, device_rate, target_rate);
        let _ = sender.send(PcmFrame {
            samples: samples.into(),
            sample_rate: target_rate,
        });
    };

    let active_err = Arc::clone(&active);
    let on_error = move |err: cpal::StreamError| {
        error!(?err, "Input stream error");
        active_err.store(false, Ordering::SeqCst);
        let _ = fault.send(());
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| publish(downmix(data, channels)),
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                publish(downmix(&floats, channels))
            },
            on_error,
            None,
        ),
        other => {
            return Err(MediaAccessError::new(
                MediaErrorKind::Overconstrained,
                format!("Unsupported sample format: {other:?}"),
            ))
        }
    }
    .map_err(build_error)?;

    stream.play().map_err(|e| {
        MediaAccessError::new(MediaErrorKind::NotReadable, format!("Failed to start stream: {e}"))
    })?;
    Ok((stream, name))
}

/// A live cpal input stream. The non-`Send` cpal stream lives on its own
/// thread until the tracks are stopped or the device fails; either way the
/// frame channel closes.
pub struct CpalMediaStream {
    id: String,
    sample_rate: u32,
    active: Arc<AtomicBool>,
    frames: Mutex<broadcast::Receiver<PcmFrame>>,
    stop_tx: Mutex<Option<std_mpsc::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MediaStream for CpalMediaStream {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn subscribe(&self) -> broadcast::Receiver<PcmFrame> {
        self.frames.lock().resubscribe()
    }

    fn stop_tracks(&self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(stop) = self.stop_tx.lock().take() {
            // Wakes the stream thread, which drops the stream.
            let _ = stop.send(());
            self.thread.lock().take();
            debug!(stream = %self.id, "Input tracks stopped");
        }
    }
}

impl Drop for CpalMediaStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

/// cpal-backed microphone acquisition.
pub struct CpalMediaDevices {
    preferred_device: Option<String>,
    next_id: AtomicU64,
}

impl CpalMediaDevices {
    pub fn new() -> Self {
        Self::with_device(None)
    }

    /// Prefer an input device by name, falling back to the default.
    pub fn with_device(preferred_device: Option<String>) -> Self {
        Self {
            preferred_device,
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for CpalMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for CpalMediaDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<dyn MediaStream>, MediaAccessError> {
        if wants_voice_processing(constraints) {
            debug!(?constraints, "Voice processing constraints are advisory for cpal input");
        }

        let id = format!("cpal-input-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let target_rate = frame_rate(constraints);
        let (sender, frames) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let active = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let fault_tx = stop_tx.clone();
        let thread_active = Arc::clone(&active);
        let preferred = self.preferred_device.clone();
        let thread = thread::Builder::new()
            .name(id.clone())
            .spawn(move || {
                let opened = open_input(
                    preferred.as_deref(),
                    target_rate,
                    sender,
                    Arc::clone(&thread_active),
                    fault_tx,
                );
                match opened {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        // Blocks until stop_tracks or a stream error signals.
                        let _ = stop_rx.recv();
                        drop(stream);
                        thread_active.store(false, Ordering::SeqCst);
                        debug!("Input stream thread exiting");
                    }
                    Err(e) => {
                        thread_active.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| {
                MediaAccessError::new(MediaErrorKind::NotReadable, format!("Failed to spawn input thread: {e}"))
            })?;

        let device_name = ready_rx.await.map_err(|_| {
            MediaAccessError::new(MediaErrorKind::Aborted, "Input thread exited before reporting")
        })??;

        info!(stream = %id, device = %device_name, sample_rate = target_rate, "Input stream opened");
        Ok(Arc::new(CpalMediaStream {
            id,
            sample_rate: target_rate,
            active,
            frames: Mutex::new(frames),
            stop_tx: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
        }))
    }

    async fn permission_state(&self) -> PermissionState {
        // Desktop audio hosts expose no permission model.
        PermissionState::Unknown
    }
}
