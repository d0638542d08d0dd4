use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Classification of a diagnostics entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DebugLogType {
    SocketOpen,
    SocketClose,
    SocketError,
    AsrMessage,
    SegmentFinal,
    SegmentInterim,
    AudioChunk,
    StateChange,
    Error,
    Save,
    Keepalive,
    Stall,
}

/// One diagnostics entry. Entries are kept in memory only and are never sent
/// to the backend.
#[derive(Debug, Clone, Serialize)]
pub struct DebugLogEntry {
    pub id: Uuid,
    /// Milliseconds since the session started.
    pub timestamp_ms: u64,
    #[serde(rename = "type")]
    pub entry_type: DebugLogType,
    pub message: String,
}

/// Bounded append-only ring of debug entries; the oldest entry is evicted
/// once capacity is reached.
#[derive(Debug)]
pub struct DebugLogRing {
    entries: VecDeque<DebugLogEntry>,
    capacity: usize,
}

impl DebugLogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, timestamp_ms: u64, entry_type: DebugLogType, message: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(DebugLogEntry {
            id: Uuid::new_v4(),
            timestamp_ms,
            entry_type,
            message,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest-first snapshot of the retained entries.
    pub fn entries(&self) -> Vec<DebugLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
