//! Wire format of the streaming transcription service.
//!
//! The service speaks JSON text frames; audio goes the other way as binary
//! frames. Unknown message types are tolerated and ignored so service-side
//! additions never break an active recording.

use serde::Deserialize;

/// Messages the service sends, tagged by their `type` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    Results(ResultsEvent),
    UtteranceEnd {},
    SpeechStarted {},
    Metadata {},
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct ResultsEvent {
    /// Utterance start in seconds from stream start.
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
    pub is_final: bool,
    /// Set when the endpointer decided the speaker finished the utterance.
    #[serde(default)]
    pub speech_final: bool,
    pub channel: Channel,
}

#[derive(Debug, Deserialize)]
pub struct Channel {
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
pub struct Alternative {
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub words: Vec<Word>,
}

#[derive(Debug, Deserialize)]
pub struct Word {
    pub word: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub speaker: Option<u32>,
}

/// A confirmed utterance, ready to become a transcript segment.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalTranscript {
    pub text: String,
    pub confidence: f32,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub speaker: Option<u32>,
}

/// Classification of a parsed server message.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    /// Provisional text; replaces any previous interim.
    Interim(String),
    /// Confirmed utterance (`is_final && speech_final`, non-empty text).
    Final(FinalTranscript),
    ServiceError(String),
    /// Structurally valid but carries nothing the session needs.
    Ignored,
}

/// Parse one JSON text frame into its session-level meaning.
///
/// Empty transcripts are ignored rather than surfaced, matching how the
/// service emits silence-only result frames.
pub fn parse_message(raw: &str) -> Result<ParsedMessage, serde_json::Error> {
    let message: ServerMessage = serde_json::from_str(raw)?;
    Ok(match message {
        ServerMessage::Results(results) => classify_results(results),
        ServerMessage::Error { message } => {
            ParsedMessage::ServiceError(message.unwrap_or_else(|| "transcription error".into()))
        }
        ServerMessage::UtteranceEnd {}
        | ServerMessage::SpeechStarted {}
        | ServerMessage::Metadata {}
        | ServerMessage::Unknown => ParsedMessage::Ignored,
    })
}

fn classify_results(results: ResultsEvent) -> ParsedMessage {
    let Some(alternative) = results.channel.alternatives.first() else {
        return ParsedMessage::Ignored;
    };
    let text = alternative.transcript.trim();
    if text.is_empty() {
        return ParsedMessage::Ignored;
    }

    if results.is_final && results.speech_final {
        let speaker = alternative.words.first().and_then(|w| w.speaker);
        ParsedMessage::Final(FinalTranscript {
            text: text.to_string(),
            confidence: alternative.confidence,
            start_ms: (results.start * 1000.0).round() as u64,
            duration_ms: (results.duration * 1000.0).round() as u64,
            speaker,
        })
    } else {
        // `is_final` without `speech_final` is still provisional for the
        // ongoing utterance; the endpointer has not committed it yet.
        ParsedMessage::Interim(text.to_string())
    }
}
