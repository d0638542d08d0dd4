use super::backend::{AudioCaptureBackend, BackendEvent, CaptureConfig};
use crate::error::RecorderError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A fixed-duration slice of captured audio.
///
/// Sequence numbers are strictly increasing within a recording; chunks are
/// consumed exactly once by the transcription stream and never persisted.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// 16-bit little-endian PCM.
    pub pcm: Vec<u8>,
    pub sequence: u64,
    pub sample_rate: u32,
    /// Offset of the first sample relative to recording start.
    pub timestamp_ms: u64,
}

/// Events emitted by the engine to its consumer.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Chunk(AudioChunk),
    /// Instantaneous loudness in [0, 1], recomputed per chunk.
    Level(f32),
    /// Recoverable device failure; the engine does not retry.
    Error(String),
}

/// Owns the microphone for the lifetime of a session.
///
/// Re-frames whatever buffer sizes the backend delivers into fixed-duration
/// chunks, numbers them, and computes a loudness level per chunk. `pause`
/// gates emission without releasing the device; `stop` flushes one final
/// partial chunk if buffered audio remains.
pub struct AudioCaptureEngine {
    backend: Box<dyn AudioCaptureBackend>,
    config: CaptureConfig,
    sample_rate: u32,
    paused: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
    initialized: bool,
}

impl AudioCaptureEngine {
    pub fn new(backend: Box<dyn AudioCaptureBackend>, config: CaptureConfig) -> Self {
        let sample_rate = config.sample_rate;
        Self {
            backend,
            config,
            sample_rate,
            paused: Arc::new(AtomicBool::new(false)),
            task: None,
            shutdown: None,
            initialized: false,
        }
    }

    /// Request microphone access and negotiate the capture format.
    pub async fn initialize(&mut self) -> Result<(), RecorderError> {
        self.sample_rate = self.backend.initialize().await?;
        self.initialized = true;
        info!(
            "capture engine initialized: backend={} rate={}Hz",
            self.backend.name(),
            self.sample_rate
        );
        Ok(())
    }

    /// The sample rate the device actually delivers; only meaningful after
    /// `initialize`.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Begin emitting chunks. Rejected while already running.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<CaptureEvent>, RecorderError> {
        if !self.initialized {
            return Err(RecorderError::UnsupportedPlatform(
                "capture engine not initialized".to_string(),
            ));
        }
        if self.task.is_some() {
            warn!("capture engine already running");
            return Err(RecorderError::InvalidState {
                command: "start",
                status: "capturing".to_string(),
            });
        }

        let mut backend_rx = self.backend.start().await?;
        let (events_tx, events_rx) = mpsc::channel(64);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        self.paused.store(false, Ordering::SeqCst);
        let paused = Arc::clone(&self.paused);
        let sample_rate = self.sample_rate;
        let chunk_samples =
            ((u64::from(sample_rate) * self.config.chunk_duration_ms) / 1000).max(1) as usize;

        let task = tokio::spawn(async move {
            let mut residue: Vec<i16> = Vec::with_capacity(chunk_samples);
            let mut sequence: u64 = 0;
            let mut samples_emitted: u64 = 0;

            loop {
                tokio::select! {
                    event = backend_rx.recv() => {
                        match event {
                            Some(BackendEvent::Frame(frame)) => {
                                if paused.load(Ordering::SeqCst) {
                                    // Emission is suspended; the device stays open.
                                    continue;
                                }
                                residue.extend_from_slice(&frame.samples);
                                while residue.len() >= chunk_samples {
                                    let samples: Vec<i16> =
                                        residue.drain(..chunk_samples).collect();
                                    if !emit_chunk(
                                        &events_tx,
                                        samples,
                                        &mut sequence,
                                        &mut samples_emitted,
                                        sample_rate,
                                    )
                                    .await
                                    {
                                        return;
                                    }
                                }
                            }
                            Some(BackendEvent::Error(msg)) => {
                                warn!("capture device error: {}", msg);
                                if events_tx.send(CaptureEvent::Error(msg)).await.is_err() {
                                    return;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            // One last partial chunk if buffered audio remains.
            if !residue.is_empty() {
                let samples = std::mem::take(&mut residue);
                let _ = emit_chunk(
                    &events_tx,
                    samples,
                    &mut sequence,
                    &mut samples_emitted,
                    sample_rate,
                )
                .await;
            }
            debug!("capture task finished after {} chunks", sequence);
        });

        self.task = Some(task);
        self.shutdown = Some(shutdown_tx);
        Ok(events_rx)
    }

    /// Suspend chunk emission without releasing the microphone.
    pub async fn pause(&mut self) -> Result<(), RecorderError> {
        self.paused.store(true, Ordering::SeqCst);
        self.backend.pause().await
    }

    /// Resume chunk emission, re-arming the backend stream even if it looks
    /// active (self-heals a platform-suspended stream).
    pub async fn resume(&mut self) -> Result<(), RecorderError> {
        self.backend.resume().await?;
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Release the device, flush the final partial chunk and end the event
    /// stream. Safe to call when not running.
    pub async fn stop(&mut self) -> Result<(), RecorderError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("capture task panicked: {}", e);
            }
        }
        self.backend.stop().await
    }

    pub fn is_capturing(&self) -> bool {
        self.task.is_some()
    }
}

async fn emit_chunk(
    events_tx: &mpsc::Sender<CaptureEvent>,
    samples: Vec<i16>,
    sequence: &mut u64,
    samples_emitted: &mut u64,
    sample_rate: u32,
) -> bool {
    let timestamp_ms = *samples_emitted * 1000 / u64::from(sample_rate.max(1));
    let level = rms_level(&samples);
    let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

    let chunk = AudioChunk {
        pcm,
        sequence: *sequence,
        sample_rate,
        timestamp_ms,
    };
    *sequence += 1;
    *samples_emitted += samples.len() as u64;

    if events_tx.send(CaptureEvent::Chunk(chunk)).await.is_err() {
        return false;
    }
    events_tx.send(CaptureEvent::Level(level)).await.is_ok()
}

/// RMS loudness of a chunk, scaled so conversational speech spans most of
/// the [0, 1] meter.
fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = f64::from(s) / 32_768.0;
            normalized * normalized
        })
        .sum();
    let rms = (sum_squares / samples.len() as f64).sqrt() as f32;
    (rms * 4.0).clamp(0.0, 1.0)
}
