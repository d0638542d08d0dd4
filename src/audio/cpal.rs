//! Microphone capture via CPAL.
//!
//! The cpal device and stream are `!Send`, so they live on a dedicated
//! worker thread; the backend talks to it through a command channel and
//! receives converted frames over a tokio channel.

use super::backend::{AudioCaptureBackend, AudioFrame, BackendEvent, CaptureConfig};
use crate::error::RecorderError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::mpsc as std_mpsc;
use tokio::sync::mpsc;
use tracing::{info, warn};

enum WorkerCommand {
    Pause,
    Resume,
    Stop,
}

struct Worker {
    commands: std_mpsc::Sender<WorkerCommand>,
    handle: std::thread::JoinHandle<()>,
}

/// Real microphone backend.
pub struct CpalBackend {
    config: CaptureConfig,
    negotiated_rate: Option<u32>,
    worker: Option<Worker>,
}

impl CpalBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            negotiated_rate: None,
            worker: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioCaptureBackend for CpalBackend {
    async fn initialize(&mut self) -> Result<u32, RecorderError> {
        let rate = tokio::task::spawn_blocking(probe_input_device)
            .await
            .map_err(|e| RecorderError::UnsupportedPlatform(e.to_string()))??;

        info!("microphone initialized at {} Hz", rate);
        self.negotiated_rate = Some(rate);
        Ok(rate)
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>, RecorderError> {
        if self.worker.is_some() {
            warn!("capture already started");
            return Err(RecorderError::InvalidState {
                command: "start",
                status: "capturing".to_string(),
            });
        }
        if self.negotiated_rate.is_none() {
            return Err(RecorderError::UnsupportedPlatform(
                "backend not initialized".to_string(),
            ));
        }

        let (events_tx, events_rx) = mpsc::channel(32);
        let (command_tx, command_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture_worker(events_tx, command_rx, ready_tx))
            .map_err(|e| RecorderError::UnsupportedPlatform(e.to_string()))?;

        // Wait for the worker to open the stream (or fail to).
        let startup = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| RecorderError::UnsupportedPlatform(e.to_string()))?
            .map_err(|_| {
                RecorderError::PermissionDenied("capture worker exited during startup".to_string())
            })?;

        match startup {
            Ok(rate) => {
                self.negotiated_rate = Some(rate);
                self.worker = Some(Worker {
                    commands: command_tx,
                    handle,
                });
                Ok(events_rx)
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    async fn pause(&mut self) -> Result<(), RecorderError> {
        if let Some(worker) = &self.worker {
            let _ = worker.commands.send(WorkerCommand::Pause);
        }
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), RecorderError> {
        // Always replayed, even if the stream looks active: some hosts
        // silently suspend an input stream when the process loses focus.
        if let Some(worker) = &self.worker {
            let _ = worker.commands.send(WorkerCommand::Resume);
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RecorderError> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(WorkerCommand::Stop);
            let _ = tokio::task::spawn_blocking(move || worker.handle.join()).await;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}

/// Probe the default input device and report its native sample rate.
fn probe_input_device() -> Result<u32, RecorderError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| RecorderError::UnsupportedPlatform("no input device available".to_string()))?;
    let default_config = device.default_input_config().map_err(|e| {
        RecorderError::PermissionDenied(format!("{}. {}", e, mic_permission_hint()))
    })?;
    Ok(default_config.sample_rate().0)
}

/// Worker thread body: owns the device and stream for their whole lifetime.
fn capture_worker(
    events_tx: mpsc::Sender<BackendEvent>,
    command_rx: std_mpsc::Receiver<WorkerCommand>,
    ready_tx: std_mpsc::Sender<Result<u32, RecorderError>>,
) {
    let stream_setup = open_input_stream(events_tx);
    let (stream, rate) = match stream_setup {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(RecorderError::PermissionDenied(format!(
            "{}. {}",
            e,
            mic_permission_hint()
        ))));
        return;
    }
    let _ = ready_tx.send(Ok(rate));

    while let Ok(command) = command_rx.recv() {
        match command {
            WorkerCommand::Pause => {
                if let Err(e) = stream.pause() {
                    warn!("failed to pause capture stream: {}", e);
                }
            }
            WorkerCommand::Resume => {
                if let Err(e) = stream.play() {
                    warn!("failed to resume capture stream: {}", e);
                }
            }
            WorkerCommand::Stop => break,
        }
    }
    // Dropping the stream releases the device; dropping events_tx closes
    // the frame channel.
}

fn open_input_stream(
    events_tx: mpsc::Sender<BackendEvent>,
) -> Result<(cpal::Stream, u32), RecorderError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| RecorderError::UnsupportedPlatform("no input device available".to_string()))?;
    let default_config = device.default_input_config().map_err(|e| {
        RecorderError::PermissionDenied(format!("{}. {}", e, mic_permission_hint()))
    })?;

    let format = default_config.sample_format();
    let stream_config: StreamConfig = default_config.into();
    let sample_rate = stream_config.sample_rate.0;
    let channels = usize::from(stream_config.channels.max(1));

    let err_tx = events_tx.clone();
    let err_fn = move |err: cpal::StreamError| {
        // Device loss mid-recording lands here; surface it, never retry.
        let _ = err_tx.try_send(BackendEvent::Error(err.to_string()));
    };

    let mut samples_sent: u64 = 0;
    let frame_tx = events_tx;
    let mut deliver = move |samples: Vec<i16>| {
        let timestamp_ms = samples_sent * 1000 / u64::from(sample_rate.max(1));
        samples_sent += samples.len() as u64;
        // try_send keeps the realtime callback non-blocking; a full channel
        // means the consumer stalled and the frame is dropped.
        let _ = frame_tx.try_send(BackendEvent::Frame(AudioFrame {
            samples,
            sample_rate,
            timestamp_ms,
        }));
    };

    let stream = match format {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| deliver(downmix_to_i16(data, channels, |s| s)),
                err_fn,
                None,
            )
            .map_err(build_error)?,
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    deliver(downmix_to_i16(data, channels, |s| s as f32 / 32_768.0))
                },
                err_fn,
                None,
            )
            .map_err(build_error)?,
        SampleFormat::U16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[u16], _| {
                    deliver(downmix_to_i16(data, channels, |s| {
                        (s as f32 - 32_768.0) / 32_768.0
                    }))
                },
                err_fn,
                None,
            )
            .map_err(build_error)?,
        other => {
            return Err(RecorderError::UnsupportedPlatform(format!(
                "unsupported sample format: {:?}",
                other
            )))
        }
    };

    Ok((stream, sample_rate))
}

fn build_error(e: cpal::BuildStreamError) -> RecorderError {
    RecorderError::PermissionDenied(format!("{}. {}", e, mic_permission_hint()))
}

/// Average interleaved channels down to mono and quantize to i16.
fn downmix_to_i16<T: Copy>(data: &[T], channels: usize, convert: impl Fn(T) -> f32) -> Vec<i16> {
    let channels = channels.max(1);
    let mut out = Vec::with_capacity(data.len() / channels);
    for frame in data.chunks(channels) {
        let mut sum = 0.0f32;
        for &sample in frame {
            sum += convert(sample);
        }
        let mono = (sum / channels as f32).clamp(-1.0, 1.0);
        let quantized = if mono < 0.0 {
            (mono * 32_768.0) as i16
        } else {
            (mono * 32_767.0) as i16
        };
        out.push(quantized);
    }
    out
}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and that the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}
