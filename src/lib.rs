pub mod asr;
pub mod audio;
pub mod config;
pub mod error;
pub mod persistence;
pub mod session;

pub use asr::{AsrCredentials, AsrEvent, DeepgramClient, StreamParams, TranscriptionStream};
pub use audio::{
    AudioCaptureBackend, AudioCaptureEngine, AudioChunk, CaptureBackendFactory, CaptureConfig,
    CaptureEvent,
};
pub use config::RecorderConfig;
pub use error::RecorderError;
pub use persistence::{AccessTokenProvider, HttpPersistenceGateway, PersistenceGateway};
pub use session::{
    RecordingSession, RecordingSessionController, RecordingStatus, TranscriptSegment,
};
