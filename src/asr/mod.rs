//! Streaming speech-to-text client.

pub mod client;
pub mod messages;
pub mod params;

pub use client::{AsrEvent, ConnectionState, DeepgramClient, TranscriptionStream};
pub use messages::{FinalTranscript, ParsedMessage};
pub use params::{AsrCredentials, StreamParams};
