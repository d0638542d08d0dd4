use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lifecycle states of a recording session.
///
/// Valid transitions:
/// `idle → initializing → ready → recording ⇄ paused → processing → saving
/// → completed`, with `error` reachable from every non-terminal state and
/// `start()` accepted again from `completed` (re-recording).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Idle,
    Initializing,
    Ready,
    Recording,
    Paused,
    Processing,
    Saving,
    Completed,
    Error,
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordingStatus::Idle => "idle",
            RecordingStatus::Initializing => "initializing",
            RecordingStatus::Ready => "ready",
            RecordingStatus::Recording => "recording",
            RecordingStatus::Paused => "paused",
            RecordingStatus::Processing => "processing",
            RecordingStatus::Saving => "saving",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A confirmed or provisional transcript chunk.
///
/// Final segments are immutable once emitted and ordered by `start_offset_ms`
/// within a session. Interim text never becomes a segment; it lives only in
/// `RecordingSession::interim_text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: String,
    pub text: String,
    pub is_final: bool,
    /// Recognition confidence in [0, 1].
    pub confidence: f32,
    /// Utterance start relative to the stream start.
    pub start_offset_ms: u64,
    pub duration_ms: u64,
    /// Speaker index when the backend runs multi-speaker detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<u32>,
}

/// The session aggregate. Owned and mutated exclusively by the controller;
/// callers observe it through cloned snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSession {
    pub status: RecordingStatus,
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock elapsed minus accumulated pause time, set at stop().
    pub duration_seconds: f64,
    pub paused_duration_seconds: f64,
    pub segments: Vec<TranscriptSegment>,
    /// Latest provisional text for the in-progress utterance.
    pub interim_text: String,
    /// Instantaneous loudness in [0, 1], for UI feedback only.
    pub audio_level: f32,
    pub error: Option<String>,
    /// Server-issued draft id; survives save retries so the draft is
    /// never created twice.
    pub conversation_id: Option<String>,
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self {
            status: RecordingStatus::Idle,
            started_at: None,
            duration_seconds: 0.0,
            paused_duration_seconds: 0.0,
            segments: Vec::new(),
            interim_text: String::new(),
            audio_level: 0.0,
            error: None,
            conversation_id: None,
        }
    }
}

/// Everything the event pump can observe from the engines. Applied to the
/// aggregate by [`RecordingSession::apply`] and mirrored into the debug log
/// by the controller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SocketOpen,
    SocketClosed { code: u16, reason: String },
    SocketError(String),
    Interim(String),
    Segment(TranscriptSegment),
    AudioChunk { sequence: u64, bytes: usize },
    AudioLevel(f32),
    CaptureError(String),
    Keepalive,
    Stall { idle_secs: u64 },
}

impl RecordingSession {
    /// Fold one observed event into the aggregate.
    ///
    /// This is deliberately a synchronous function over plain data so the
    /// assembly rules (interim overwrite, final append order, interim
    /// clearing, error preservation) are directly testable.
    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::SocketOpen
            | SessionEvent::AudioChunk { .. }
            | SessionEvent::Keepalive
            | SessionEvent::Stall { .. } => {}

            SessionEvent::SocketClosed { code, reason } => {
                // Stale interim text must never survive a disconnect.
                self.interim_text.clear();
                let unexpected = *code != 1000
                    && matches!(
                        self.status,
                        RecordingStatus::Recording | RecordingStatus::Paused
                    );
                if unexpected {
                    self.error =
                        Some(format!("transcription connection closed: {} {}", code, reason));
                    self.status = RecordingStatus::Error;
                }
            }

            SessionEvent::SocketError(msg) | SessionEvent::CaptureError(msg) => {
                // Segments are preserved so the caller can still save.
                self.error = Some(msg.clone());
                self.status = RecordingStatus::Error;
            }

            SessionEvent::Interim(text) => {
                self.interim_text = text.clone();
            }

            SessionEvent::Segment(segment) => {
                if !segment.is_final {
                    return;
                }
                if let Some(last) = self.segments.last() {
                    if segment.start_offset_ms < last.start_offset_ms {
                        warn!(
                            "segment {} arrived out of order ({}ms < {}ms)",
                            segment.id, segment.start_offset_ms, last.start_offset_ms
                        );
                    }
                }
                self.segments.push(segment.clone());
                self.interim_text.clear();
            }

            SessionEvent::AudioLevel(level) => {
                self.audio_level = level.clamp(0.0, 1.0);
            }
        }
    }

    /// Reset the aggregate to a blank session, keeping nothing.
    pub fn reset(&mut self) {
        *self = RecordingSession::default();
    }
}
