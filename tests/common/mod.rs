//! Scripted doubles for the capture backend, the transcription stream and
//! the persistence gateway, so session flows run deterministically on a
//! paused runtime clock.

use maity_recorder::asr::{
    AsrEvent, ConnectionState, FinalTranscript, StreamParams, TranscriptionStream,
};
use maity_recorder::audio::{
    AudioCaptureBackend, AudioCaptureEngine, BackendEvent, CaptureConfig,
};
use maity_recorder::config::RecorderConfig;
use maity_recorder::error::RecorderError;
use maity_recorder::persistence::PersistenceGateway;
use maity_recorder::session::{RecordingSessionController, TranscriptSegment};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Lets a test feed raw frames to the capture engine.
#[derive(Clone, Default)]
pub struct BackendHandle {
    frames: Arc<Mutex<Option<mpsc::Sender<BackendEvent>>>>,
}

impl BackendHandle {
    /// Clone of the live frame sender, if capture is running.
    pub fn sender(&self) -> Option<mpsc::Sender<BackendEvent>> {
        self.frames.lock().unwrap().clone()
    }

    pub async fn emit(&self, event: BackendEvent) {
        let tx = self
            .frames
            .lock()
            .unwrap()
            .clone()
            .expect("backend not started");
        tx.send(event).await.expect("engine dropped frame channel");
    }
}

pub struct ScriptedBackend {
    handle: BackendHandle,
    fail_initialize: Option<RecorderError>,
    capturing: bool,
}

#[async_trait::async_trait]
impl AudioCaptureBackend for ScriptedBackend {
    async fn initialize(&mut self) -> Result<u32, RecorderError> {
        match self.fail_initialize.take() {
            Some(e) => Err(e),
            None => Ok(16000),
        }
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>, RecorderError> {
        let (tx, rx) = mpsc::channel(64);
        *self.handle.frames.lock().unwrap() = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    async fn pause(&mut self) -> Result<(), RecorderError> {
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), RecorderError> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RecorderError> {
        self.handle.frames.lock().unwrap().take();
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Lets a test emit transcription events and observe forwarded audio.
#[derive(Clone, Default)]
pub struct StreamHandle {
    events: Arc<Mutex<Option<mpsc::Sender<AsrEvent>>>>,
    pub sent_chunks: Arc<AtomicUsize>,
    pub connects: Arc<AtomicUsize>,
}

impl StreamHandle {
    pub async fn emit(&self, event: AsrEvent) {
        let tx = self
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("stream not connected");
        tx.send(event).await.expect("client dropped event channel");
    }

    pub async fn emit_interim(&self, text: &str) {
        self.emit(AsrEvent::Interim(text.to_string())).await;
    }

    pub async fn emit_final(&self, text: &str, start_ms: u64) {
        self.emit(AsrEvent::Final(FinalTranscript {
            text: text.to_string(),
            confidence: 0.95,
            start_ms,
            duration_ms: 600,
            speaker: None,
        }))
        .await;
    }
}

pub struct ScriptedStream {
    handle: StreamHandle,
    state: Arc<Mutex<ConnectionState>>,
    fail_connect: bool,
}

#[async_trait::async_trait]
impl TranscriptionStream for ScriptedStream {
    async fn connect(
        &mut self,
        _params: StreamParams,
    ) -> Result<mpsc::Receiver<AsrEvent>, RecorderError> {
        self.handle.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            *self.state.lock().unwrap() = ConnectionState::Error;
            return Err(RecorderError::Connection("scripted refusal".into()));
        }
        let (tx, rx) = mpsc::channel(256);
        tx.send(AsrEvent::Connected).await.ok();
        *self.handle.events.lock().unwrap() = Some(tx);
        *self.state.lock().unwrap() = ConnectionState::Connected;
        Ok(rx)
    }

    fn send_audio(&self, _pcm: &[u8]) {
        if *self.state.lock().unwrap() == ConnectionState::Connected {
            self.handle.sent_chunks.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn disconnect(&mut self) {
        self.handle.events.lock().unwrap().take();
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }
}

/// Records every gateway call in order; `finalize` can be armed to fail once.
#[derive(Clone, Default)]
pub struct GatewayHandle {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub drafts_created: Arc<AtomicUsize>,
    pub fail_finalize_once: Arc<AtomicBool>,
    pub appended: Arc<Mutex<Vec<TranscriptSegment>>>,
}

pub struct FakeGateway {
    handle: GatewayHandle,
}

#[async_trait::async_trait]
impl PersistenceGateway for FakeGateway {
    async fn create_draft(&self, source: &str) -> Result<String, RecorderError> {
        self.handle.calls.lock().unwrap().push(format!("draft:{}", source));
        self.handle.drafts_created.fetch_add(1, Ordering::SeqCst);
        Ok("conv-1".to_string())
    }

    async fn append_segments(
        &self,
        conversation_id: &str,
        segments: &[TranscriptSegment],
    ) -> Result<(), RecorderError> {
        if segments.is_empty() {
            return Ok(());
        }
        self.handle
            .calls
            .lock()
            .unwrap()
            .push(format!("segments:{}:{}", conversation_id, segments.len()));
        self.handle
            .appended
            .lock()
            .unwrap()
            .extend_from_slice(segments);
        Ok(())
    }

    async fn finalize(
        &self,
        conversation_id: &str,
        duration_seconds: f64,
    ) -> Result<(), RecorderError> {
        if self.handle.fail_finalize_once.swap(false, Ordering::SeqCst) {
            return Err(RecorderError::Persistence("finalize returned 500".into()));
        }
        self.handle
            .calls
            .lock()
            .unwrap()
            .push(format!("finalize:{}:{:.1}", conversation_id, duration_seconds));
        Ok(())
    }
}

pub struct Fixture {
    pub controller: RecordingSessionController,
    pub backend: BackendHandle,
    pub stream: StreamHandle,
    pub gateway: GatewayHandle,
}

pub fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    build_fixture(None, false)
}

pub fn fixture_with_mic_failure(error: RecorderError) -> Fixture {
    build_fixture(Some(error), false)
}

pub fn fixture_with_connect_failure() -> Fixture {
    build_fixture(None, true)
}

fn build_fixture(fail_initialize: Option<RecorderError>, fail_connect: bool) -> Fixture {
    let backend_handle = BackendHandle::default();
    let backend = ScriptedBackend {
        handle: backend_handle.clone(),
        fail_initialize,
        capturing: false,
    };

    let stream_handle = StreamHandle::default();
    let stream = ScriptedStream {
        handle: stream_handle.clone(),
        state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
        fail_connect,
    };

    let gateway_handle = GatewayHandle::default();
    let gateway = FakeGateway {
        handle: gateway_handle.clone(),
    };

    let engine = AudioCaptureEngine::new(Box::new(backend), CaptureConfig::default());
    let controller = RecordingSessionController::new(
        engine,
        Box::new(stream),
        Arc::new(gateway),
        RecorderConfig::default(),
    );

    Fixture {
        controller,
        backend: backend_handle,
        stream: stream_handle,
        gateway: gateway_handle,
    }
}

/// Let spawned tasks drain their channels; advances the paused clock a hair.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
}
