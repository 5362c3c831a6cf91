//! End-to-end orchestrator tests against in-process fakes.

use chrono::{TimeZone, Utc};
use dualcam::capture::types::GeoFix;
use dualcam::error::CamError;
use dualcam::geometry::Orientation;
use dualcam::orchestrator::{CaptureOrchestrator, RecordingOptions, StillOptions, VideoEvent};
use dualcam::testing::{
    CountingWriterFactory, FakeCameraProvider, FakeCompositorFactory, FakeRig, FixedLocation,
    NullPreview,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Harness {
    orchestrator: Arc<CaptureOrchestrator>,
    rig: FakeRig,
    preview: Arc<NullPreview>,
    writers: Arc<CountingWriterFactory>,
    _output: tempfile::TempDir,
}

fn harness_with(fix: Option<GeoFix>) -> Harness {
    let (provider, rig) = FakeCameraProvider::with_rig();
    let preview = Arc::new(NullPreview::default());
    let writers = Arc::new(CountingWriterFactory::default());
    let output = tempfile::tempdir().expect("tempdir");

    let orchestrator = CaptureOrchestrator::new(
        Arc::new(provider),
        preview.clone(),
        Arc::new(FixedLocation(fix)),
        writers.clone(),
        Arc::new(FakeCompositorFactory::default()),
        output.path().to_path_buf(),
    );

    Harness {
        orchestrator,
        rig,
        preview,
        writers,
        _output: output,
    }
}

fn harness() -> Harness {
    harness_with(None)
}

async fn next_event(rx: &mut broadcast::Receiver<VideoEvent>) -> VideoEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn enable_brings_up_session_and_preview() {
    let h = harness();
    assert!(h.orchestrator.device_supports_dual_mode());
    assert!(!h.orchestrator.is_dual_mode_enabled().await);

    h.orchestrator.enable_dual_mode().await.unwrap();
    assert!(h.orchestrator.is_dual_mode_enabled().await);
    assert_eq!(h.preview.placed(), 1);

    let second = h.orchestrator.enable_dual_mode().await;
    assert!(matches!(second, Err(CamError::AlreadyEnabled)));

    h.orchestrator.disable_dual_mode().await.unwrap();
}

#[tokio::test]
async fn enable_rejected_without_dual_capable_hardware() {
    let preview = Arc::new(NullPreview::default());
    let output = tempfile::tempdir().unwrap();
    let orchestrator = CaptureOrchestrator::new(
        Arc::new(FakeCameraProvider::single_camera()),
        preview,
        Arc::new(FixedLocation(None)),
        Arc::new(CountingWriterFactory::default()),
        Arc::new(FakeCompositorFactory::default()),
        output.path().to_path_buf(),
    );

    assert!(!orchestrator.device_supports_dual_mode());
    assert!(matches!(
        orchestrator.enable_dual_mode().await,
        Err(CamError::Unsupported)
    ));
}

#[tokio::test]
async fn disable_is_benign_when_not_enabled() {
    let h = harness();
    h.orchestrator.disable_dual_mode().await.unwrap();

    h.orchestrator.enable_dual_mode().await.unwrap();
    h.orchestrator.disable_dual_mode().await.unwrap();
    h.orchestrator.disable_dual_mode().await.unwrap();
    assert_eq!(h.preview.torn_down(), 1);
    assert!(!h.orchestrator.is_dual_mode_enabled().await);
}

#[tokio::test]
async fn still_capture_writes_geotagged_jpeg() {
    let fix = GeoFix {
        latitude: 37.7749,
        longitude: -122.4194,
        altitude_m: Some(16.0),
        speed_mps: Some(0.0),
        course_deg: None,
        timestamp: Utc.with_ymd_and_hms(2026, 8, 29, 18, 4, 5).unwrap(),
    };
    let h = harness_with(Some(fix));
    h.orchestrator.enable_dual_mode().await.unwrap();

    let pending = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.capture_still(StillOptions::default()).await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    h.rig.emit_pair().await;

    let path = pending.await.unwrap().unwrap();
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jpg"));
    assert!(path.exists());

    h.orchestrator.disable_dual_mode().await.unwrap();
}

#[tokio::test]
async fn still_capture_with_flash_toggles_back_camera() {
    let h = harness();
    h.orchestrator.enable_dual_mode().await.unwrap();

    let pending = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.capture_still(StillOptions { flash: true }).await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    h.rig.emit_pair().await;

    pending.await.unwrap().unwrap();
    assert_eq!(h.rig.flash_events(), vec![true, false]);

    h.orchestrator.disable_dual_mode().await.unwrap();
}

#[tokio::test]
async fn pending_still_does_not_block_disable() {
    let h = harness();
    h.orchestrator.enable_dual_mode().await.unwrap();

    // No frames are emitted, so the capture would sit in its wait until
    // the timeout; disable must not queue behind it.
    let pending = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.capture_still(StillOptions::default()).await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;

    let started = std::time::Instant::now();
    h.orchestrator.disable_dual_mode().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    // Teardown dropped the still waiter; the capture resolves with an error.
    assert!(pending.await.unwrap().is_err());
}

#[tokio::test]
async fn missing_microphone_still_records_video() {
    let (provider, rig) = FakeCameraProvider::without_microphone();
    let preview = Arc::new(NullPreview::default());
    let writers = Arc::new(CountingWriterFactory::default());
    let output = tempfile::tempdir().unwrap();
    let orchestrator = CaptureOrchestrator::new(
        Arc::new(provider),
        preview,
        Arc::new(FixedLocation(None)),
        writers.clone(),
        Arc::new(FakeCompositorFactory::default()),
        output.path().to_path_buf(),
    );

    orchestrator.enable_dual_mode().await.unwrap();

    orchestrator
        .start_video_recording(RecordingOptions {
            record_with_audio: true,
            video_duration_ms: 0,
        })
        .await
        .unwrap();

    rig.emit_pair().await;
    rig.emit_audio(vec![0i16; 256]).await;
    rig.emit_pair().await;

    orchestrator.stop_video_recording().await.unwrap();

    let counts = writers.last_counts().unwrap();
    assert!(counts.video() >= 1);
    assert_eq!(counts.audio(), 0);

    orchestrator.disable_dual_mode().await.unwrap();
}

#[tokio::test]
async fn still_capture_requires_enabled_session() {
    let h = harness();
    assert!(matches!(
        h.orchestrator.capture_still(StillOptions::default()).await,
        Err(CamError::NotEnabled)
    ));
}

#[tokio::test]
async fn recording_auto_stops_at_deadline() {
    let h = harness();
    h.orchestrator.enable_dual_mode().await.unwrap();
    let mut events = h.orchestrator.subscribe_video_events();

    h.orchestrator
        .start_video_recording(RecordingOptions {
            record_with_audio: true,
            video_duration_ms: 100,
        })
        .await
        .unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        VideoEvent::Recording { recording: true }
    ));

    h.rig.emit_pair().await;
    h.rig.emit_audio(vec![0i16; 256]).await;
    h.rig.emit_pair().await;

    assert!(matches!(
        next_event(&mut events).await,
        VideoEvent::Recording { recording: false }
    ));
    match next_event(&mut events).await {
        VideoEvent::Finished { native_path, .. } => {
            assert!(native_path.ends_with("counting_dual.mp4"));
        }
        other => panic!("expected finished event, got {:?}", other),
    }

    let counts = h.writers.last_counts().unwrap();
    assert!(counts.finished());
    assert!(counts.video() >= 1);
    assert!(counts.audio() >= 1);

    h.orchestrator.disable_dual_mode().await.unwrap();
}

#[tokio::test]
async fn explicit_stop_beats_deadline_exactly_once() {
    let h = harness();
    h.orchestrator.enable_dual_mode().await.unwrap();
    let mut events = h.orchestrator.subscribe_video_events();

    h.orchestrator
        .start_video_recording(RecordingOptions {
            record_with_audio: false,
            video_duration_ms: 60_000,
        })
        .await
        .unwrap();
    let _ = next_event(&mut events).await;

    h.orchestrator.stop_video_recording().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        VideoEvent::Recording { recording: false }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        VideoEvent::Finished { .. }
    ));

    // The deadline was cancelled and the recording already finalized.
    assert!(matches!(
        h.orchestrator.stop_video_recording().await,
        Err(CamError::Session(_))
    ));

    h.orchestrator.disable_dual_mode().await.unwrap();
}

#[tokio::test]
async fn stop_without_recording_is_an_error() {
    let h = harness();
    h.orchestrator.enable_dual_mode().await.unwrap();
    assert!(matches!(
        h.orchestrator.stop_video_recording().await,
        Err(CamError::Session(_))
    ));
    h.orchestrator.disable_dual_mode().await.unwrap();
}

#[tokio::test]
async fn rotation_during_recording_keeps_encoded_geometry() {
    let h = harness();
    h.orchestrator.enable_dual_mode().await.unwrap();

    h.orchestrator
        .start_video_recording(RecordingOptions {
            record_with_audio: false,
            video_duration_ms: 0,
        })
        .await
        .unwrap();

    let options = h.writers.last_options().unwrap();
    assert_eq!(options.orientation_hint, Orientation::Portrait);

    // Mid-recording rotation only nudges the overlay preset; the sources
    // never hear about it.
    h.orchestrator
        .handle_orientation_change(Orientation::LandscapeLeft)
        .await
        .unwrap();
    assert_eq!(h.rig.last_orientation(), None);

    h.orchestrator.stop_video_recording().await.unwrap();

    // After the recording the rotation flows through.
    h.orchestrator
        .handle_orientation_change(Orientation::LandscapeRight)
        .await
        .unwrap();
    assert_eq!(h.rig.last_orientation(), Some(Orientation::LandscapeRight));

    // The next recording locks the new orientation.
    h.orchestrator
        .start_video_recording(RecordingOptions {
            record_with_audio: false,
            video_duration_ms: 0,
        })
        .await
        .unwrap();
    let options = h.writers.last_options().unwrap();
    assert_eq!(options.orientation_hint, Orientation::LandscapeRight);

    h.orchestrator.disable_dual_mode().await.unwrap();
}

#[tokio::test]
async fn disable_finalizes_inflight_recording() {
    let h = harness();
    h.orchestrator.enable_dual_mode().await.unwrap();
    let mut events = h.orchestrator.subscribe_video_events();

    h.orchestrator
        .start_video_recording(RecordingOptions {
            record_with_audio: false,
            video_duration_ms: 0,
        })
        .await
        .unwrap();
    let _ = next_event(&mut events).await;

    h.orchestrator.disable_dual_mode().await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        VideoEvent::Recording { recording: false }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        VideoEvent::Finished { .. }
    ));
    assert!(h.writers.last_counts().unwrap().finished());
}
