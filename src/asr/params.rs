use crate::config::AsrConfig;

/// Parameters negotiated with the transcription service at connect time.
///
/// Everything here is encoded into the websocket URL query string; the
/// service does not accept mid-stream reconfiguration.
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub language: String,
    pub model: String,
    pub punctuate: bool,
    pub interim_results: bool,
    /// Silence window (ms) after which the service finalizes an utterance.
    pub endpointing_ms: u32,
    pub vad_events: bool,
    pub diarize: bool,
    /// Raw PCM properties of the audio we will send.
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamParams {
    pub fn from_config(config: &AsrConfig, sample_rate: u32, channels: u16) -> Self {
        Self {
            language: config.language.clone(),
            model: config.model.clone(),
            punctuate: config.punctuate,
            interim_results: config.interim_results,
            endpointing_ms: config.endpointing_ms,
            vad_events: config.vad_events,
            diarize: config.diarize,
            sample_rate,
            channels,
        }
    }

    /// Query string in the form the service expects, without a leading `?`.
    pub fn query_string(&self) -> String {
        format!(
            "model={}&language={}&punctuate={}&interim_results={}&endpointing={}&vad_events={}&diarize={}&encoding=linear16&sample_rate={}&channels={}",
            self.model,
            self.language,
            self.punctuate,
            self.interim_results,
            self.endpointing_ms,
            self.vad_events,
            self.diarize,
            self.sample_rate,
            self.channels,
        )
    }
}

/// API key holder with a redacting `Debug` so the key never lands in logs.
#[derive(Clone)]
pub struct AsrCredentials {
    api_key: String,
}

impl AsrCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for AsrCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsrCredentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Full websocket URL for a streaming session.
pub fn build_url(base: &str, params: &StreamParams, credentials: &AsrCredentials) -> String {
    format!(
        "{}?{}&token={}",
        base,
        params.query_string(),
        credentials.api_key()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StreamParams {
        StreamParams {
            language: "es".into(),
            model: "nova-2".into(),
            punctuate: true,
            interim_results: true,
            endpointing_ms: 300,
            vad_events: true,
            diarize: true,
            sample_rate: 16000,
            channels: 1,
        }
    }

    #[test]
    fn query_string_carries_all_stream_options() {
        let q = params().query_string();
        assert!(q.contains("model=nova-2"));
        assert!(q.contains("language=es"));
        assert!(q.contains("endpointing=300"));
        assert!(q.contains("encoding=linear16"));
        assert!(q.contains("sample_rate=16000"));
        assert!(q.contains("interim_results=true"));
        assert!(q.contains("diarize=true"));
    }

    #[test]
    fn url_contains_token() {
        let url = build_url(
            "wss://api.example.com/v1/listen",
            &params(),
            &AsrCredentials::new("sekrit"),
        );
        assert!(url.starts_with("wss://api.example.com/v1/listen?"));
        assert!(url.ends_with("&token=sekrit"));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let debug = format!("{:?}", AsrCredentials::new("sekrit"));
        assert!(!debug.contains("sekrit"));
        assert!(debug.contains("redacted"));
    }
}
