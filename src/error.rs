use thiserror::Error;

/// Error taxonomy for the recorder subsystem.
///
/// Variants map to the recovery the caller can offer: `PermissionDenied` and
/// `UnsupportedPlatform` are fatal to initialization, `Connection` and
/// `Persistence` are retryable without losing captured segments, and
/// `Unauthenticated` requires the user to sign in again.
#[derive(Debug, Clone, Error)]
pub enum RecorderError {
    /// Microphone access was refused by the user or the OS.
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    /// Audio capture APIs are unavailable on this platform.
    #[error("audio capture not supported on this platform: {0}")]
    UnsupportedPlatform(String),

    /// Transport-level failure on the transcription connection.
    #[error("transcription connection error: {0}")]
    Connection(String),

    /// A draft/append/finalize call against the persistence backend failed.
    #[error("persistence call failed: {0}")]
    Persistence(String),

    /// No valid user session; the caller must re-authenticate before saving.
    #[error("no active user session")]
    Unauthenticated,

    /// A controller command was issued in a state that does not accept it.
    #[error("{command} is not valid while session is {status}")]
    InvalidState {
        command: &'static str,
        status: String,
    },
}
