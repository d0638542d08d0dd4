use super::messages::{parse_message, FinalTranscript, ParsedMessage};
use super::params::{build_url, AsrCredentials, StreamParams};
use crate::error::RecorderError;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

/// Connection lifecycle of the transcription socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events surfaced by a transcription stream.
#[derive(Debug, Clone)]
pub enum AsrEvent {
    Connected,
    Interim(String),
    Final(FinalTranscript),
    /// A heartbeat was sent to keep the stream open during silence.
    Keepalive,
    Closed { code: u16, reason: String },
    Error(String),
}

/// A live streaming transcription connection.
///
/// One connection per recording: there is no automatic reconnection, and
/// audio sent while disconnected is dropped rather than buffered.
#[async_trait::async_trait]
pub trait TranscriptionStream: Send {
    /// Open the socket and return the event channel for this session.
    async fn connect(
        &mut self,
        params: StreamParams,
    ) -> Result<mpsc::Receiver<AsrEvent>, RecorderError>;

    /// Forward one PCM chunk. Never blocks; chunks are dropped when the
    /// socket is not connected or the outbound queue is full.
    fn send_audio(&self, pcm: &[u8]);

    /// Flush pending audio, tell the service the stream is over, and close.
    async fn disconnect(&mut self);

    fn state(&self) -> ConnectionState;
}

/// Websocket client for a Deepgram-style streaming endpoint.
pub struct DeepgramClient {
    base_url: String,
    credentials: AsrCredentials,
    keepalive_interval: Duration,
    state: Arc<Mutex<ConnectionState>>,
    audio_tx: Option<mpsc::Sender<Vec<u8>>>,
    send_task: Option<JoinHandle<()>>,
    recv_task: Option<JoinHandle<()>>,
    dropped_chunks: Arc<AtomicU64>,
}

impl DeepgramClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: AsrCredentials,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            credentials,
            keepalive_interval,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            audio_tx: None,
            send_task: None,
            recv_task: None,
            dropped_chunks: Arc::new(AtomicU64::new(0)),
        }
    }

    fn set_state(state: &Arc<Mutex<ConnectionState>>, value: ConnectionState) {
        if let Ok(mut guard) = state.lock() {
            *guard = value;
        }
    }
}

#[async_trait::async_trait]
impl TranscriptionStream for DeepgramClient {
    async fn connect(
        &mut self,
        params: StreamParams,
    ) -> Result<mpsc::Receiver<AsrEvent>, RecorderError> {
        if self.audio_tx.is_some() {
            return Err(RecorderError::Connection(
                "transcription stream already connected".to_string(),
            ));
        }

        Self::set_state(&self.state, ConnectionState::Connecting);
        let url = build_url(&self.base_url, &params, &self.credentials);

        let (ws, _response) = connect_async(&url).await.map_err(|e| {
            Self::set_state(&self.state, ConnectionState::Error);
            RecorderError::Connection(e.to_string())
        })?;
        info!(
            "transcription stream connected: model={} language={} rate={}",
            params.model, params.language, params.sample_rate
        );
        Self::set_state(&self.state, ConnectionState::Connected);

        let (mut write, mut read) = ws.split();
        let (events_tx, events_rx) = mpsc::channel::<AsrEvent>(256);
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);

        let _ = events_tx.send(AsrEvent::Connected).await;

        // Outbound: audio chunks, heartbeats during silence, and the final
        // CloseStream once the audio channel drains.
        let keepalive_period = self.keepalive_interval;
        let send_events = events_tx.clone();
        let send_task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + keepalive_period;
            let mut keepalive = tokio::time::interval_at(start, keepalive_period);
            keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    chunk = audio_rx.recv() => {
                        match chunk {
                            Some(pcm) => {
                                if let Err(e) = write.send(Message::Binary(pcm)).await {
                                    warn!("failed to send audio frame: {}", e);
                                    break;
                                }
                                keepalive.reset();
                            }
                            None => {
                                // Session is over: tell the service to flush
                                // its final results, then close cleanly.
                                let close = Message::Text(r#"{"type":"CloseStream"}"#.to_string());
                                if let Err(e) = write.send(close).await {
                                    debug!("CloseStream send failed: {}", e);
                                }
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                    _ = keepalive.tick() => {
                        let heartbeat = Message::Text(r#"{"type":"KeepAlive"}"#.to_string());
                        if let Err(e) = write.send(heartbeat).await {
                            warn!("keepalive send failed: {}", e);
                            break;
                        }
                        let _ = send_events.send(AsrEvent::Keepalive).await;
                    }
                }
            }
        });

        // Inbound: parse text frames into typed events; malformed frames are
        // logged and dropped, never fatal.
        let recv_state = Arc::clone(&self.state);
        let recv_task = tokio::spawn(async move {
            let mut closed = false;
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match parse_message(&text) {
                        Ok(ParsedMessage::Interim(t)) => {
                            if events_tx.send(AsrEvent::Interim(t)).await.is_err() {
                                return;
                            }
                        }
                        Ok(ParsedMessage::Final(transcript)) => {
                            if events_tx.send(AsrEvent::Final(transcript)).await.is_err() {
                                return;
                            }
                        }
                        Ok(ParsedMessage::ServiceError(msg)) => {
                            if events_tx.send(AsrEvent::Error(msg)).await.is_err() {
                                return;
                            }
                        }
                        Ok(ParsedMessage::Ignored) => {}
                        Err(e) => warn!("unparseable transcription frame: {}", e),
                    },
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1000, String::new()));
                        debug!("transcription socket closed: {} {}", code, reason);
                        Self::set_state(&recv_state, ConnectionState::Disconnected);
                        let _ = events_tx.send(AsrEvent::Closed { code, reason }).await;
                        closed = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("transcription socket error: {}", e);
                        Self::set_state(&recv_state, ConnectionState::Error);
                        let _ = events_tx.send(AsrEvent::Error(e.to_string())).await;
                        closed = true;
                        break;
                    }
                }
            }
            if !closed {
                // Stream ended without a close frame.
                Self::set_state(&recv_state, ConnectionState::Disconnected);
                let _ = events_tx
                    .send(AsrEvent::Closed {
                        code: 1006,
                        reason: "connection dropped".to_string(),
                    })
                    .await;
            }
        });

        self.audio_tx = Some(audio_tx);
        self.send_task = Some(send_task);
        self.recv_task = Some(recv_task);
        Ok(events_rx)
    }

    fn send_audio(&self, pcm: &[u8]) {
        if self.state() != ConnectionState::Connected {
            let dropped = self.dropped_chunks.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("dropping audio chunk while disconnected ({} total)", dropped);
            return;
        }
        if let Some(tx) = &self.audio_tx {
            if tx.try_send(pcm.to_vec()).is_err() {
                let dropped = self.dropped_chunks.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("outbound audio queue full, dropped chunk ({} total)", dropped);
            }
        }
    }

    async fn disconnect(&mut self) {
        // Dropping the audio sender makes the send task drain remaining
        // chunks, emit CloseStream and close the socket.
        self.audio_tx = None;
        if let Some(task) = self.send_task.take() {
            if let Err(e) = task.await {
                warn!("send task failed during shutdown: {}", e);
            }
        }
        if let Some(task) = self.recv_task.take() {
            // The service acknowledges CloseStream with its final results and
            // a close frame; do not wait forever if it misbehaves.
            match tokio::time::timeout(Duration::from_secs(2), task).await {
                Ok(Err(e)) => warn!("receive task failed during shutdown: {}", e),
                Err(_) => debug!("receive task did not finish within close grace period"),
                Ok(Ok(())) => {}
            }
        }
        Self::set_state(&self.state, ConnectionState::Disconnected);
    }

    fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|guard| *guard)
            .unwrap_or(ConnectionState::Error)
    }
}
