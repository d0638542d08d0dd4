use super::debug_log::{DebugLogEntry, DebugLogRing, DebugLogType};
use super::state::{RecordingSession, RecordingStatus, SessionEvent, TranscriptSegment};
use crate::asr::{AsrEvent, StreamParams, TranscriptionStream};
use crate::audio::{AudioCaptureEngine, CaptureEvent};
use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::persistence::PersistenceGateway;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Origin tag sent with created drafts so the backend can distinguish
/// recording surfaces.
const RECORDING_SOURCE: &str = "web_recorder";

/// State observed by the event pump and mutated behind locks.
struct Shared {
    session: Mutex<RecordingSession>,
    logs: Mutex<DebugLogRing>,
    epoch: Instant,
}

impl Shared {
    fn timestamp_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    async fn push_log(&self, entry_type: DebugLogType, message: String) {
        let timestamp = self.timestamp_ms();
        self.logs.lock().await.push(timestamp, entry_type, message);
    }

    /// Fold an event into the aggregate and mirror it into the debug log.
    async fn record(&self, event: SessionEvent) {
        self.session.lock().await.apply(&event);
        match &event {
            SessionEvent::SocketOpen => {
                self.push_log(DebugLogType::SocketOpen, "socket connected".into())
                    .await;
            }
            SessionEvent::SocketClosed { code, reason } => {
                self.push_log(
                    DebugLogType::SocketClose,
                    format!("socket closed: {} {}", code, reason),
                )
                .await;
            }
            SessionEvent::SocketError(msg) => {
                self.push_log(DebugLogType::SocketError, msg.clone()).await;
            }
            SessionEvent::Interim(text) => {
                self.push_log(DebugLogType::SegmentInterim, text.clone())
                    .await;
            }
            SessionEvent::Segment(segment) => {
                self.push_log(
                    DebugLogType::SegmentFinal,
                    format!("{}: {}", segment.id, segment.text),
                )
                .await;
            }
            SessionEvent::AudioChunk { sequence, bytes } => {
                // Sampled: one entry per 50 chunks keeps the ring useful.
                if sequence % 50 == 0 {
                    self.push_log(
                        DebugLogType::AudioChunk,
                        format!("chunk {} ({} bytes)", sequence, bytes),
                    )
                    .await;
                }
            }
            SessionEvent::CaptureError(msg) => {
                self.push_log(DebugLogType::Error, format!("capture: {}", msg))
                    .await;
            }
            SessionEvent::Keepalive => {
                self.push_log(DebugLogType::Keepalive, "heartbeat sent".into())
                    .await;
            }
            SessionEvent::Stall { idle_secs } => {
                self.push_log(
                    DebugLogType::Stall,
                    format!("no transcription activity for {}s", idle_secs),
                )
                .await;
            }
            SessionEvent::AudioLevel(_) => {}
        }
    }
}

/// Orchestrates one recording at a time: microphone capture, the streaming
/// transcription socket, transcript assembly and the save flow.
///
/// Callers drive it with commands (`initialize`, `start`, `pause`, `resume`,
/// `stop`, `save`, `discard`) and observe progress through [`Self::session`]
/// snapshots. Invalid commands fail with [`RecorderError::InvalidState`]
/// without touching the session.
pub struct RecordingSessionController {
    config: RecorderConfig,
    engine: AudioCaptureEngine,
    stream: Arc<Mutex<Box<dyn TranscriptionStream>>>,
    gateway: Arc<dyn PersistenceGateway>,
    shared: Arc<Shared>,
    pump: Option<JoinHandle<()>>,
    pump_shutdown: Option<oneshot::Sender<()>>,
    started_instant: Option<Instant>,
    pause_started: Option<Instant>,
    paused_total: Duration,
}

impl RecordingSessionController {
    pub fn new(
        engine: AudioCaptureEngine,
        stream: Box<dyn TranscriptionStream>,
        gateway: Arc<dyn PersistenceGateway>,
        config: RecorderConfig,
    ) -> Self {
        let capacity = config.session.debug_log_capacity;
        Self {
            config,
            engine,
            stream: Arc::new(Mutex::new(stream)),
            gateway,
            shared: Arc::new(Shared {
                session: Mutex::new(RecordingSession::default()),
                logs: Mutex::new(DebugLogRing::new(capacity)),
                epoch: Instant::now(),
            }),
            pump: None,
            pump_shutdown: None,
            started_instant: None,
            pause_started: None,
            paused_total: Duration::ZERO,
        }
    }

    /// Snapshot of the current session aggregate.
    pub async fn session(&self) -> RecordingSession {
        self.shared.session.lock().await.clone()
    }

    pub async fn status(&self) -> RecordingStatus {
        self.shared.session.lock().await.status
    }

    /// Oldest-first snapshot of the diagnostics ring.
    pub async fn debug_log(&self) -> Vec<DebugLogEntry> {
        self.shared.logs.lock().await.entries()
    }

    /// Acquire the microphone (triggering the permission prompt) and probe
    /// the capture format.
    pub async fn initialize(&mut self) -> Result<(), RecorderError> {
        self.expect_status("initialize", &[RecordingStatus::Idle])
            .await?;
        self.set_status(RecordingStatus::Initializing).await;

        match self.engine.initialize().await {
            Ok(()) => {
                self.set_status(RecordingStatus::Ready).await;
                Ok(())
            }
            Err(e) => {
                self.fail(format!("microphone unavailable: {}", e)).await;
                Err(e)
            }
        }
    }

    /// Begin a fresh recording. Allowed from `ready` and, for re-recording,
    /// from `completed`; everything from the previous recording is dropped.
    pub async fn start(&mut self) -> Result<(), RecorderError> {
        self.expect_status(
            "start",
            &[RecordingStatus::Ready, RecordingStatus::Completed],
        )
        .await?;

        {
            let mut session = self.shared.session.lock().await;
            session.reset();
            session.status = RecordingStatus::Ready;
        }
        self.shared.logs.lock().await.clear();

        let params = StreamParams::from_config(
            &self.config.asr,
            self.engine.sample_rate(),
            self.config.audio.channels,
        );
        let asr_rx = match self.stream.lock().await.connect(params).await {
            Ok(rx) => rx,
            Err(e) => {
                self.fail(format!("transcription connect failed: {}", e))
                    .await;
                return Err(e);
            }
        };

        let capture_rx = match self.engine.start().await {
            Ok(rx) => rx,
            Err(e) => {
                self.stream.lock().await.disconnect().await;
                self.fail(format!("audio capture failed: {}", e)).await;
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.pump = Some(spawn_event_pump(
            Arc::clone(&self.shared),
            Arc::clone(&self.stream),
            capture_rx,
            asr_rx,
            shutdown_rx,
            self.config.session.stall_timeout_secs,
        ));
        self.pump_shutdown = Some(shutdown_tx);

        self.started_instant = Some(Instant::now());
        self.pause_started = None;
        self.paused_total = Duration::ZERO;

        {
            let mut session = self.shared.session.lock().await;
            session.started_at = Some(Utc::now());
        }
        self.set_status(RecordingStatus::Recording).await;
        info!("recording started");
        Ok(())
    }

    /// Suspend capture. The transcription socket and its heartbeats stay up
    /// so the stream survives the pause.
    pub async fn pause(&mut self) -> Result<(), RecorderError> {
        self.expect_status("pause", &[RecordingStatus::Recording])
            .await?;
        self.engine.pause().await?;
        self.pause_started = Some(Instant::now());
        self.set_status(RecordingStatus::Paused).await;
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<(), RecorderError> {
        self.expect_status("resume", &[RecordingStatus::Paused])
            .await?;
        self.engine.resume().await?;
        if let Some(pause_started) = self.pause_started.take() {
            self.paused_total += pause_started.elapsed();
        }
        self.set_status(RecordingStatus::Recording).await;
        Ok(())
    }

    /// End the recording: release the microphone, give the service a short
    /// settle window to deliver trailing finals, then close the stream.
    pub async fn stop(&mut self) -> Result<(), RecorderError> {
        self.expect_status(
            "stop",
            &[RecordingStatus::Recording, RecordingStatus::Paused],
        )
        .await?;

        // Stopping while paused counts the open pause interval too.
        if let Some(pause_started) = self.pause_started.take() {
            self.paused_total += pause_started.elapsed();
        }
        let elapsed = self
            .started_instant
            .take()
            .map(|s| s.elapsed())
            .unwrap_or_default();
        let paused = self.paused_total;
        let duration = elapsed.saturating_sub(paused);

        self.set_status(RecordingStatus::Processing).await;

        if let Err(e) = self.engine.stop().await {
            warn!("audio engine stop failed: {}", e);
        }

        // Trailing results for the last utterance arrive shortly after the
        // final audio chunk; wait before closing the stream.
        tokio::time::sleep(Duration::from_millis(self.config.session.settle_delay_ms)).await;

        self.teardown().await;

        {
            let mut session = self.shared.session.lock().await;
            session.duration_seconds = duration.as_secs_f64();
            session.paused_duration_seconds = paused.as_secs_f64();
            session.interim_text.clear();
            session.audio_level = 0.0;
            info!(
                "recording stopped: {:.1}s recorded, {} segments",
                session.duration_seconds,
                session.segments.len()
            );
        }
        Ok(())
    }

    /// Persist the finished recording. Also allowed from `error` so a user
    /// can salvage whatever transcript was collected before a failure.
    ///
    /// Retryable: the draft id survives a failed attempt, so retrying never
    /// creates a second conversation.
    pub async fn save(&mut self) -> Result<String, RecorderError> {
        self.expect_status("save", &[RecordingStatus::Processing, RecordingStatus::Error])
            .await?;
        // A save out of `error` may still own a live microphone and pump
        // (the failure happened mid-recording, not through stop()).
        self.teardown().await;
        self.set_status(RecordingStatus::Saving).await;

        let (existing_id, segments, duration) = {
            let session = self.shared.session.lock().await;
            (
                session.conversation_id.clone(),
                session.segments.clone(),
                session.duration_seconds,
            )
        };

        let result = async {
            let conversation_id = match existing_id {
                Some(id) => id,
                None => {
                    let id = self.gateway.create_draft(RECORDING_SOURCE).await?;
                    self.shared.session.lock().await.conversation_id = Some(id.clone());
                    id
                }
            };
            self.gateway
                .append_segments(&conversation_id, &segments)
                .await?;
            self.gateway.finalize(&conversation_id, duration).await?;
            Ok::<String, RecorderError>(conversation_id)
        }
        .await;

        match result {
            Ok(conversation_id) => {
                self.set_status(RecordingStatus::Completed).await;
                self.shared
                    .push_log(
                        DebugLogType::Save,
                        format!(
                            "saved {} segments to {}",
                            segments.len(),
                            conversation_id
                        ),
                    )
                    .await;
                info!("recording saved as {}", conversation_id);
                Ok(conversation_id)
            }
            Err(e) => {
                error!("save failed: {}", e);
                self.fail(format!("save failed: {}", e)).await;
                Err(e)
            }
        }
    }

    /// Throw the recording away. Nothing is persisted and nothing is sent
    /// to the backend; the controller returns to `idle`.
    pub async fn discard(&mut self) -> Result<(), RecorderError> {
        self.expect_status(
            "discard",
            &[RecordingStatus::Processing, RecordingStatus::Error],
        )
        .await?;

        self.reset().await;
        info!("recording discarded");
        Ok(())
    }

    /// Abandon whatever is happening and return to a blank `idle` session.
    ///
    /// Valid from any state. Unlike `discard` this is the escape hatch:
    /// it also releases a microphone and closes a stream left running by a
    /// mid-recording failure.
    pub async fn reset(&mut self) {
        self.teardown().await;
        self.shared.session.lock().await.reset();
        self.shared.logs.lock().await.clear();
        info!("session reset");
    }

    /// Stop everything still running: capture engine, transcription stream
    /// and the event pump. Idempotent; events already queued are folded in
    /// before the pump exits.
    async fn teardown(&mut self) {
        if let Err(e) = self.engine.stop().await {
            warn!("audio engine stop failed: {}", e);
        }
        self.stream.lock().await.disconnect().await;
        if let Some(shutdown) = self.pump_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                warn!("event pump failed during shutdown: {}", e);
            }
        }
        self.started_instant = None;
        self.pause_started = None;
        self.paused_total = Duration::ZERO;
    }

    async fn expect_status(
        &self,
        command: &'static str,
        allowed: &[RecordingStatus],
    ) -> Result<(), RecorderError> {
        let status = self.shared.session.lock().await.status;
        if allowed.contains(&status) {
            Ok(())
        } else {
            Err(RecorderError::InvalidState {
                command,
                status: status.to_string(),
            })
        }
    }

    async fn set_status(&self, status: RecordingStatus) {
        let previous = {
            let mut session = self.shared.session.lock().await;
            let previous = session.status;
            session.status = status;
            previous
        };
        self.shared
            .push_log(
                DebugLogType::StateChange,
                format!("{} -> {}", previous, status),
            )
            .await;
    }

    async fn fail(&self, message: String) {
        {
            let mut session = self.shared.session.lock().await;
            session.error = Some(message.clone());
            session.status = RecordingStatus::Error;
        }
        self.shared.push_log(DebugLogType::Error, message).await;
    }
}

/// Single consumer of both engines: forwards audio to the stream, folds
/// every observation into the session, and watches for silent stalls.
fn spawn_event_pump(
    shared: Arc<Shared>,
    stream: Arc<Mutex<Box<dyn TranscriptionStream>>>,
    mut capture_rx: mpsc::Receiver<CaptureEvent>,
    mut asr_rx: mpsc::Receiver<AsrEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
    stall_timeout_secs: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut watchdog = tokio::time::interval(Duration::from_secs(1));
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();
        let mut last_level: f32 = 0.0;
        let mut stall_logged = false;
        let mut next_segment: u64 = 0;
        let mut capture_open = true;
        let mut asr_open = true;

        loop {
            tokio::select! {
                event = capture_rx.recv(), if capture_open => {
                    match event {
                        Some(event) => {
                            // A moving level meter counts as activity; a
                            // stall means the meter froze AND transcripts
                            // went quiet.
                            if let CaptureEvent::Level(level) = &event {
                                if (*level - last_level).abs() > f32::EPSILON {
                                    last_level = *level;
                                    last_activity = Instant::now();
                                    stall_logged = false;
                                }
                            }
                            handle_capture_event(&shared, &stream, event).await;
                        }
                        None => capture_open = false,
                    }
                }
                event = asr_rx.recv(), if asr_open => {
                    match event {
                        Some(event) => {
                            if asr_activity(&event) {
                                last_activity = Instant::now();
                                stall_logged = false;
                            }
                            handle_asr_event(&shared, event, &mut next_segment).await;
                        }
                        None => asr_open = false,
                    }
                }
                _ = watchdog.tick() => {
                    let recording = matches!(
                        shared.session.lock().await.status,
                        RecordingStatus::Recording
                    );
                    let idle = last_activity.elapsed();
                    if recording
                        && !stall_logged
                        && idle >= Duration::from_secs(stall_timeout_secs)
                    {
                        shared
                            .record(SessionEvent::Stall { idle_secs: idle.as_secs() })
                            .await;
                        stall_logged = true;
                    }
                }
                _ = &mut shutdown_rx => {
                    // Drain whatever both engines already queued, then stop.
                    while let Ok(event) = capture_rx.try_recv() {
                        handle_capture_event(&shared, &stream, event).await;
                    }
                    while let Ok(event) = asr_rx.try_recv() {
                        handle_asr_event(&shared, event, &mut next_segment).await;
                    }
                    break;
                }
            }
            if !capture_open && !asr_open {
                break;
            }
        }
    })
}

async fn handle_capture_event(
    shared: &Arc<Shared>,
    stream: &Arc<Mutex<Box<dyn TranscriptionStream>>>,
    event: CaptureEvent,
) {
    match event {
        CaptureEvent::Chunk(chunk) => {
            stream.lock().await.send_audio(&chunk.pcm);
            shared
                .record(SessionEvent::AudioChunk {
                    sequence: chunk.sequence,
                    bytes: chunk.pcm.len(),
                })
                .await;
        }
        CaptureEvent::Level(level) => {
            shared.record(SessionEvent::AudioLevel(level)).await;
        }
        CaptureEvent::Error(msg) => {
            shared.record(SessionEvent::CaptureError(msg)).await;
        }
    }
}

async fn handle_asr_event(shared: &Arc<Shared>, event: AsrEvent, next_segment: &mut u64) {
    match event {
        AsrEvent::Connected => {
            shared.record(SessionEvent::SocketOpen).await;
        }
        AsrEvent::Interim(text) => {
            shared.record(SessionEvent::Interim(text)).await;
        }
        AsrEvent::Final(transcript) => {
            let segment = TranscriptSegment {
                id: format!("seg-{}", next_segment),
                text: transcript.text,
                is_final: true,
                confidence: transcript.confidence,
                start_offset_ms: transcript.start_ms,
                duration_ms: transcript.duration_ms,
                speaker: transcript.speaker,
            };
            *next_segment += 1;
            shared.record(SessionEvent::Segment(segment)).await;
        }
        AsrEvent::Keepalive => {
            shared.record(SessionEvent::Keepalive).await;
        }
        AsrEvent::Closed { code, reason } => {
            shared.record(SessionEvent::SocketClosed { code, reason }).await;
        }
        AsrEvent::Error(msg) => {
            shared.record(SessionEvent::SocketError(msg)).await;
        }
    }
}

fn asr_activity(event: &AsrEvent) -> bool {
    matches!(
        event,
        AsrEvent::Connected | AsrEvent::Interim(_) | AsrEvent::Final(_)
    )
}
