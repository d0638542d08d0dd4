use crate::error::RecorderError;
use tokio::sync::mpsc;

/// Audio sample data delivered by a capture backend (16-bit PCM, mono).
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM).
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started.
    pub timestamp_ms: u64,
}

/// What a backend can deliver on its event channel: audio, or a recoverable
/// device failure (e.g. a Bluetooth headset disconnecting mid-recording).
/// The backend never retries on its own; the caller decides whether to stop
/// or reinitialize.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    Frame(AudioFrame),
    Error(String),
}

/// Configuration for a capture backend.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Requested sample rate (the device may negotiate a different one).
    pub sample_rate: u32,
    /// Requested channel count; frames are downmixed to mono regardless.
    pub channels: u16,
    /// Duration of each chunk the engine assembles from backend frames.
    pub chunk_duration_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_duration_ms: 100,
        }
    }
}

/// Microphone capture backend trait.
///
/// `initialize` acquires the device (and with it the platform permission
/// prompt) without starting emission; `pause`/`resume` suspend and re-arm
/// the stream while keeping the device open, because re-acquiring the
/// microphone is slow and unreliable on some platforms.
#[async_trait::async_trait]
pub trait AudioCaptureBackend: Send {
    /// Request device access and negotiate a format.
    ///
    /// Returns the sample rate the device actually delivers. Fails with
    /// `PermissionDenied` if access is refused or `UnsupportedPlatform` if
    /// no capture API is available.
    async fn initialize(&mut self) -> Result<u32, RecorderError>;

    /// Begin emitting frames.
    ///
    /// Returns a channel receiver that delivers frames and device errors.
    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>, RecorderError>;

    /// Suspend emission without releasing the device.
    async fn pause(&mut self) -> Result<(), RecorderError>;

    /// Re-arm the stream. Must be safe to call even when the backend
    /// believes it is already running, so a platform-suspended stream is
    /// healed transparently.
    async fn resume(&mut self) -> Result<(), RecorderError>;

    /// Release the device and the capture stream.
    async fn stop(&mut self) -> Result<(), RecorderError>;

    /// Check if the backend is currently capturing.
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging.
    fn name(&self) -> &str;
}

/// Capture backend factory.
pub struct CaptureBackendFactory;

impl CaptureBackendFactory {
    /// Create the platform microphone backend.
    pub fn create(config: CaptureConfig) -> Result<Box<dyn AudioCaptureBackend>, RecorderError> {
        use super::cpal::CpalBackend;
        Ok(Box::new(CpalBackend::new(config)))
    }
}
