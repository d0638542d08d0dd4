//! Recording session lifecycle and transcript assembly.

pub mod controller;
pub mod debug_log;
pub mod state;

pub use controller::RecordingSessionController;
pub use debug_log::{DebugLogEntry, DebugLogRing, DebugLogType};
pub use state::{RecordingSession, RecordingStatus, SessionEvent, TranscriptSegment};
