//! Microphone capture and chunk framing.

pub mod backend;
pub mod cpal;
pub mod engine;

pub use backend::{
    AudioCaptureBackend, AudioFrame, BackendEvent, CaptureBackendFactory, CaptureConfig,
};
pub use engine::{AudioCaptureEngine, AudioChunk, CaptureEvent};
