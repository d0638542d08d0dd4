//! End-to-end session flows against scripted capture and transcription
//! doubles, on a paused runtime clock so durations are exact.

mod common;

use common::{fixture, fixture_with_connect_failure, fixture_with_mic_failure, settle};
use maity_recorder::asr::AsrEvent;
use maity_recorder::audio::{AudioFrame, BackendEvent};
use maity_recorder::error::RecorderError;
use maity_recorder::session::{DebugLogType, RecordingStatus};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn full_lifecycle_collects_ordered_segments() {
    let mut fx = fixture();

    fx.controller.initialize().await.unwrap();
    assert_eq!(fx.controller.status().await, RecordingStatus::Ready);

    fx.controller.start().await.unwrap();
    assert_eq!(fx.controller.status().await, RecordingStatus::Recording);

    fx.stream.emit_interim("hel").await;
    fx.stream.emit_final("hello", 0).await;
    tokio::time::sleep(Duration::from_millis(1200)).await;
    fx.stream.emit_final("world", 1200).await;
    tokio::time::sleep(Duration::from_millis(1300)).await;
    fx.stream.emit_final("test", 2500).await;
    tokio::time::sleep(Duration::from_millis(2500)).await;

    // Stopped at the 5 second mark; the settle window afterwards must not
    // count toward the duration.
    fx.controller.stop().await.unwrap();

    let session = fx.controller.session().await;
    assert_eq!(session.status, RecordingStatus::Processing);
    assert!((session.duration_seconds - 5.0).abs() < 0.05);
    assert_eq!(session.paused_duration_seconds, 0.0);
    assert!(session.interim_text.is_empty());
    assert_eq!(session.audio_level, 0.0);

    let ids: Vec<&str> = session.segments.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["seg-0", "seg-1", "seg-2"]);
    let texts: Vec<&str> = session.segments.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["hello", "world", "test"]);
    assert!(session.segments.iter().all(|s| s.is_final));
}

#[tokio::test(start_paused = true)]
async fn paused_time_is_excluded_from_duration() {
    let mut fx = fixture();
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    fx.controller.pause().await.unwrap();
    assert_eq!(fx.controller.status().await, RecordingStatus::Paused);

    tokio::time::sleep(Duration::from_secs(5)).await;
    fx.controller.resume().await.unwrap();
    assert_eq!(fx.controller.status().await, RecordingStatus::Recording);

    tokio::time::sleep(Duration::from_secs(3)).await;
    fx.controller.stop().await.unwrap();

    let session = fx.controller.session().await;
    assert!((session.duration_seconds - 5.0).abs() < 0.05);
    assert!((session.paused_duration_seconds - 5.0).abs() < 0.05);
}

#[tokio::test(start_paused = true)]
async fn stop_while_paused_counts_the_open_pause() {
    let mut fx = fixture();
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    fx.controller.pause().await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    fx.controller.stop().await.unwrap();

    let session = fx.controller.session().await;
    assert!((session.duration_seconds - 4.0).abs() < 0.05);
    assert!((session.paused_duration_seconds - 6.0).abs() < 0.05);
}

#[tokio::test(start_paused = true)]
async fn microphone_denial_moves_to_error() {
    let mut fx =
        fixture_with_mic_failure(RecorderError::PermissionDenied("access denied".into()));

    let err = fx.controller.initialize().await.unwrap_err();
    assert!(matches!(err, RecorderError::PermissionDenied(_)));

    let session = fx.controller.session().await;
    assert_eq!(session.status, RecordingStatus::Error);
    assert!(session.error.unwrap().contains("access denied"));
}

#[tokio::test(start_paused = true)]
async fn failed_connect_moves_to_error_without_recording() {
    let mut fx = fixture_with_connect_failure();
    fx.controller.initialize().await.unwrap();

    let err = fx.controller.start().await.unwrap_err();
    assert!(matches!(err, RecorderError::Connection(_)));
    assert_eq!(fx.controller.status().await, RecordingStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn interim_text_is_replaced_then_cleared() {
    let mut fx = fixture();
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();

    fx.stream.emit_interim("hol").await;
    fx.stream.emit_interim("hola mun").await;
    settle().await;
    assert_eq!(fx.controller.session().await.interim_text, "hola mun");

    fx.stream.emit_final("hola mundo", 0).await;
    settle().await;
    let session = fx.controller.session().await;
    assert!(session.interim_text.is_empty());
    assert_eq!(session.segments.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn abnormal_socket_close_mid_recording_is_an_error() {
    let mut fx = fixture();
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();

    fx.stream.emit_final("kept", 0).await;
    fx.stream
        .emit(AsrEvent::Closed {
            code: 1006,
            reason: "network dropped".into(),
        })
        .await;
    settle().await;

    let session = fx.controller.session().await;
    assert_eq!(session.status, RecordingStatus::Error);
    // The transcript survives the failure so it can still be saved.
    assert_eq!(session.segments.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn audio_chunks_are_forwarded_to_the_stream() {
    let mut fx = fixture();
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();

    // Two 1600-sample frames = two 100ms chunks at 16kHz.
    for _ in 0..2 {
        fx.backend
            .emit(BackendEvent::Frame(AudioFrame {
                samples: vec![500i16; 1600],
                sample_rate: 16000,
                timestamp_ms: 0,
            }))
            .await;
    }
    settle().await;

    assert_eq!(fx.stream.sent_chunks.load(Ordering::SeqCst), 2);
    let session = fx.controller.session().await;
    assert!(session.audio_level > 0.0);
}

#[tokio::test(start_paused = true)]
async fn capture_device_failure_surfaces_as_error() {
    let mut fx = fixture();
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();

    fx.backend
        .emit(BackendEvent::Error("device disconnected".into()))
        .await;
    settle().await;

    let session = fx.controller.session().await;
    assert_eq!(session.status, RecordingStatus::Error);
    assert_eq!(session.error.as_deref(), Some("device disconnected"));
}

#[tokio::test(start_paused = true)]
async fn discard_after_device_failure_releases_the_microphone() {
    let mut fx = fixture();
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();

    let stale = fx.backend.sender().expect("capture running");
    fx.backend
        .emit(BackendEvent::Error("device disconnected".into()))
        .await;
    settle().await;
    assert_eq!(fx.controller.status().await, RecordingStatus::Error);

    fx.controller.discard().await.unwrap();
    assert_eq!(fx.controller.status().await, RecordingStatus::Idle);

    // The engine and pump are gone: nothing consumes frames anymore, so a
    // late frame cannot touch the reset session.
    let late = stale
        .send(BackendEvent::Frame(AudioFrame {
            samples: vec![i16::MAX; 1600],
            sample_rate: 16000,
            timestamp_ms: 0,
        }))
        .await;
    assert!(late.is_err());
    settle().await;

    let session = fx.controller.session().await;
    assert_eq!(session.status, RecordingStatus::Idle);
    assert_eq!(session.audio_level, 0.0);
    assert!(session.segments.is_empty());

    // The released device can be acquired again for a fresh recording.
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();
    assert_eq!(fx.controller.status().await, RecordingStatus::Recording);
    fx.controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn save_after_mid_recording_failure_releases_the_microphone() {
    let mut fx = fixture();
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();

    fx.stream.emit_final("kept", 0).await;
    settle().await;
    fx.backend
        .emit(BackendEvent::Error("device disconnected".into()))
        .await;
    settle().await;
    assert_eq!(fx.controller.status().await, RecordingStatus::Error);

    // Salvaging the transcript out of the failure also stops capture.
    fx.controller.save().await.unwrap();
    assert_eq!(fx.controller.status().await, RecordingStatus::Completed);
    assert!(fx.backend.sender().is_none());
    assert_eq!(fx.controller.session().await.segments.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reset_tears_down_from_any_state() {
    let mut fx = fixture();

    // Idle: a no-op.
    fx.controller.reset().await;
    assert_eq!(fx.controller.status().await, RecordingStatus::Idle);

    // Mid-recording: releases the microphone and stream.
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();
    fx.stream.emit_final("thrown away", 0).await;
    settle().await;

    fx.controller.reset().await;
    let session = fx.controller.session().await;
    assert_eq!(session.status, RecordingStatus::Idle);
    assert!(session.segments.is_empty());
    assert!(fx.backend.sender().is_none());
    assert!(fx.controller.debug_log().await.is_empty());

    // Completed: back to a blank session.
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    fx.controller.stop().await.unwrap();
    fx.controller.save().await.unwrap();
    fx.controller.reset().await;
    assert_eq!(fx.controller.status().await, RecordingStatus::Idle);
    assert_eq!(fx.controller.session().await.conversation_id, None);
}

#[tokio::test(start_paused = true)]
async fn stall_is_logged_once_per_quiet_episode() {
    let mut fx = fixture();
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();

    // Default stall threshold is 15s of silence.
    tokio::time::sleep(Duration::from_secs(20)).await;

    let stalls = fx
        .controller
        .debug_log()
        .await
        .iter()
        .filter(|e| e.entry_type == DebugLogType::Stall)
        .count();
    assert_eq!(stalls, 1);

    // Activity resets the watchdog and a second quiet stretch logs again.
    fx.stream.emit_interim("sigo aqui").await;
    tokio::time::sleep(Duration::from_secs(20)).await;

    let stalls = fx
        .controller
        .debug_log()
        .await
        .iter()
        .filter(|e| e.entry_type == DebugLogType::Stall)
        .count();
    assert_eq!(stalls, 2);

    fx.controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn moving_audio_level_holds_off_the_stall_watchdog() {
    let mut fx = fixture();
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();

    // 20 seconds with no transcripts at all, but audio whose level keeps
    // moving. The meter counts as activity, so no stall is logged.
    for i in 0..20u32 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let amplitude = if i % 2 == 0 { 500i16 } else { 8000i16 };
        fx.backend
            .emit(BackendEvent::Frame(AudioFrame {
                samples: vec![amplitude; 1600],
                sample_rate: 16000,
                timestamp_ms: 0,
            }))
            .await;
    }
    settle().await;

    let stalls = fx
        .controller
        .debug_log()
        .await
        .iter()
        .filter(|e| e.entry_type == DebugLogType::Stall)
        .count();
    assert_eq!(stalls, 0);

    fx.controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn restart_after_completion_starts_clean() {
    let mut fx = fixture();
    fx.controller.initialize().await.unwrap();
    fx.controller.start().await.unwrap();
    fx.stream.emit_final("first take", 0).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    fx.controller.stop().await.unwrap();
    fx.controller.save().await.unwrap();
    assert_eq!(fx.controller.status().await, RecordingStatus::Completed);

    fx.controller.start().await.unwrap();
    let session = fx.controller.session().await;
    assert_eq!(session.status, RecordingStatus::Recording);
    assert!(session.segments.is_empty());
    assert_eq!(session.conversation_id, None);
    assert_eq!(session.duration_seconds, 0.0);
    assert_eq!(fx.stream.connects.load(Ordering::SeqCst), 2);

    fx.controller.stop().await.unwrap();
}
