use anyhow::Result;
use serde::Deserialize;

/// Top-level recorder configuration.
///
/// Defaults reproduce the production constants; a config file only needs to
/// override the values that differ per deployment (typically the persistence
/// base URL and the ASR language).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub audio: AudioConfig,
    pub asr: AsrConfig,
    pub persistence: PersistenceConfig,
    pub session: SessionTuning,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Requested capture sample rate (the device may negotiate another).
    pub sample_rate: u32,
    /// Channel count; the engine downmixes to mono before streaming.
    pub channels: u16,
    /// Duration of each emitted PCM chunk in milliseconds.
    pub chunk_duration_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_duration_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// WebSocket endpoint of the speech-recognition backend.
    pub url: String,
    pub language: String,
    pub model: String,
    pub punctuate: bool,
    pub interim_results: bool,
    /// Milliseconds of silence before the backend emits a final result.
    pub endpointing_ms: u32,
    pub vad_events: bool,
    /// Enable multi-speaker detection (speaker index on final segments).
    pub diarize: bool,
    /// Heartbeat period; must stay below the backend's idle timeout (10s).
    pub keepalive_interval_secs: u64,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.deepgram.com/v1/listen".to_string(),
            language: "es".to_string(),
            model: "nova-2".to_string(),
            punctuate: true,
            interim_results: true,
            endpointing_ms: 300,
            vad_events: true,
            diarize: true,
            keepalive_interval_secs: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Base URL for the draft/segments/finalize endpoints.
    pub base_url: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/recorder".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionTuning {
    /// Delay between stopping capture and entering review, so in-flight
    /// final transcripts can still arrive.
    pub settle_delay_ms: u64,
    /// Seconds without audio or transcript activity before a stall entry
    /// is logged (detection only, recording is not interrupted).
    pub stall_timeout_secs: u64,
    /// Maximum debug log entries retained; oldest are evicted first.
    pub debug_log_capacity: usize,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            settle_delay_ms: 750,
            stall_timeout_secs: 15,
            debug_log_capacity: 500,
        }
    }
}

impl RecorderConfig {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_constants() {
        let cfg = RecorderConfig::default();
        assert_eq!(cfg.audio.sample_rate, 16000);
        assert_eq!(cfg.audio.channels, 1);
        assert_eq!(cfg.asr.model, "nova-2");
        assert_eq!(cfg.asr.keepalive_interval_secs, 8);
        assert_eq!(cfg.asr.endpointing_ms, 300);
        assert_eq!(cfg.session.debug_log_capacity, 500);
    }
}
