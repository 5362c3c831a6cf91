//! Capture orchestrator
//!
//! The public surface of the crate: enables and disables dual mode, takes
//! still photos, runs duration-limited video recordings, and reacts to
//! device rotation. Host-facing notifications go out over a broadcast
//! channel.

use crate::capture::source::{CameraProvider, LocationProvider, PreviewPlacement};
use crate::capture::types::SourceConfig;
use crate::compositor::CompositorFactory;
use crate::error::{CamError, CamResult, ErrorResponse};
use crate::geometry::{pip_preset, Orientation};
use crate::session::DualSessionManager;
use crate::still::process_still;
use crate::writer::{WriterFactory, WriterOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// How long a still capture waits for both streams to deliver a frame.
const STILL_CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

const CAPTURE_FPS: u32 = 30;

/// Host-supplied options for one video recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptions {
    /// Capture microphone audio alongside the video.
    #[serde(default = "default_record_with_audio")]
    pub record_with_audio: bool,

    /// Auto-stop deadline in milliseconds; 0 disables the deadline.
    #[serde(default = "default_video_duration_ms")]
    pub video_duration_ms: u64,
}

fn default_record_with_audio() -> bool {
    true
}

fn default_video_duration_ms() -> u64 {
    3000
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            record_with_audio: default_record_with_audio(),
            video_duration_ms: default_video_duration_ms(),
        }
    }
}

/// Host-supplied options for one still capture
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StillOptions {
    /// Fire the back camera's flash for this capture, where available.
    #[serde(default)]
    pub flash: bool,
}

/// Events emitted to the host during capture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VideoEvent {
    /// Recording started or stopped
    #[serde(rename_all = "camelCase")]
    Recording { recording: bool },
    /// A recording finished and its files are on disk
    #[serde(rename_all = "camelCase")]
    Finished {
        native_path: String,
        thumbnail: Option<String>,
    },
    /// A recording failed to finalize
    #[serde(rename_all = "camelCase")]
    Error { code: String, message: String },
}

struct Inner {
    session: Option<DualSessionManager>,
    orientation: Orientation,
    deadline: Option<tokio::task::JoinHandle<()>>,
}

/// Coordinates the dual-capture session, recordings, and still captures.
pub struct CaptureOrchestrator {
    provider: Arc<dyn CameraProvider>,
    preview: Arc<dyn PreviewPlacement>,
    location: Arc<dyn LocationProvider>,
    writer_factory: Arc<dyn WriterFactory>,
    compositor_factory: Arc<dyn CompositorFactory>,
    output_dir: PathBuf,
    inner: Mutex<Inner>,
    event_tx: broadcast::Sender<VideoEvent>,
}

impl CaptureOrchestrator {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        preview: Arc<dyn PreviewPlacement>,
        location: Arc<dyn LocationProvider>,
        writer_factory: Arc<dyn WriterFactory>,
        compositor_factory: Arc<dyn CompositorFactory>,
        output_dir: PathBuf,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(100);
        Arc::new(Self {
            provider,
            preview,
            location,
            writer_factory,
            compositor_factory,
            output_dir,
            inner: Mutex::new(Inner {
                session: None,
                orientation: Orientation::Portrait,
                deadline: None,
            }),
            event_tx,
        })
    }

    /// Subscribe to capture events.
    pub fn subscribe_video_events(&self) -> broadcast::Receiver<VideoEvent> {
        self.event_tx.subscribe()
    }

    /// Whether this device can run both cameras concurrently.
    pub fn device_supports_dual_mode(&self) -> bool {
        self.provider.supports_dual_capture()
    }

    pub async fn is_dual_mode_enabled(&self) -> bool {
        self.inner.lock().await.session.is_some()
    }

    /// Bring up the dual-capture session and place the preview.
    pub async fn enable_dual_mode(&self) -> CamResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.session.is_some() {
            return Err(CamError::AlreadyEnabled);
        }
        if !self.provider.supports_dual_capture() {
            return Err(CamError::Unsupported);
        }

        let compositor = self.compositor_factory.create()?;
        let mut session =
            DualSessionManager::setup(self.provider.as_ref(), compositor, &SourceConfig::default())
                .await?;
        session.start_streams().await?;

        self.preview.place()?;
        session.set_pip_layout(pip_preset(inner.orientation)).await;

        inner.session = Some(session);
        tracing::info!("Dual mode enabled");
        Ok(())
    }

    /// Tear everything down. Calling without an active session is benign.
    pub async fn disable_dual_mode(self: &Arc<Self>) -> CamResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.deadline.take() {
            handle.abort();
        }

        let Some(mut session) = inner.session.take() else {
            return Ok(());
        };

        // An in-flight recording is finalized before the streams go down.
        if let Some(writer) = session.stop_recording().await {
            self.finalize_writer(writer).await;
        }
        session.stop().await;
        self.preview.teardown();

        tracing::info!("Dual mode disabled");
        Ok(())
    }

    /// Capture a composited still photo, geotagged when a fix is known.
    pub async fn capture_still(&self, options: StillOptions) -> CamResult<PathBuf> {
        let (pending, orientation) = {
            let mut inner = self.inner.lock().await;
            let orientation = inner.orientation;
            let session = inner.session.as_mut().ok_or(CamError::NotEnabled)?;

            if options.flash {
                session.set_flash(true);
            }
            (session.request_still_frame(), orientation)
        };

        // The frame wait runs without the orchestrator lock so stop and
        // disable stay responsive while a still is in flight.
        let frame = tokio::time::timeout(STILL_CAPTURE_TIMEOUT, pending).await;

        if options.flash {
            if let Some(session) = self.inner.lock().await.session.as_mut() {
                session.set_flash(false);
            }
        }

        let frame = frame
            .ok()
            .and_then(|r| r.ok())
            .ok_or_else(|| CamError::Encode("no composited frame arrived".to_string()))?;

        let fix = self.location.last_known_fix();
        let output_dir = self.output_dir.clone();
        tokio::task::spawn_blocking(move || {
            process_still(&frame, orientation, fix.as_ref(), &output_dir)
        })
        .await
        .map_err(|e| CamError::Encode(format!("still task failed: {}", e)))?
    }

    /// Start a duration-limited recording.
    pub async fn start_video_recording(
        self: &Arc<Self>,
        options: RecordingOptions,
    ) -> CamResult<()> {
        let mut inner = self.inner.lock().await;
        let session = inner.session.as_ref().ok_or(CamError::NotEnabled)?;

        let orientation = inner.orientation.normalized();
        let writer = self.writer_factory.create(&WriterOptions {
            output_dir: self.output_dir.clone(),
            audio_enabled: options.record_with_audio,
            orientation_hint: orientation,
            fps: CAPTURE_FPS,
        })?;

        session
            .start_recording(writer, orientation, options.record_with_audio)
            .await?;

        if options.video_duration_ms > 0 {
            let this = Arc::clone(self);
            let deadline = Duration::from_millis(options.video_duration_ms);
            inner.deadline = Some(tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                // The timer is completing on its own; aborting its handle
                // here would cancel the finalization mid-await.
                this.finish_recording(false).await;
            }));
        }

        let _ = self.event_tx.send(VideoEvent::Recording { recording: true });
        tracing::info!(
            "Video recording started ({:?}, audio={}, deadline={}ms)",
            orientation,
            options.record_with_audio,
            options.video_duration_ms
        );
        Ok(())
    }

    /// Stop the active recording and finalize its files.
    pub async fn stop_video_recording(self: &Arc<Self>) -> CamResult<()> {
        if self.finish_recording(true).await {
            Ok(())
        } else {
            Err(crate::session::SessionError::NotRecording.into())
        }
    }

    /// The single stop routine shared by the explicit stop, the deadline
    /// timer, and disable. Returns whether this call finalized a recording;
    /// racing callers resolve to exactly one `true`.
    ///
    /// `abort_deadline` must be false when called from the deadline task
    /// itself; the handle it would abort is its own.
    async fn finish_recording(self: &Arc<Self>, abort_deadline: bool) -> bool {
        let writer = {
            let mut inner = self.inner.lock().await;
            if let Some(handle) = inner.deadline.take() {
                if abort_deadline {
                    handle.abort();
                }
            }
            match inner.session.as_ref() {
                Some(session) => session.stop_recording().await,
                None => None,
            }
        };

        match writer {
            Some(writer) => {
                self.finalize_writer(writer).await;
                true
            }
            None => false,
        }
    }

    async fn finalize_writer(&self, writer: Box<dyn crate::writer::MediaWriter>) {
        let _ = self
            .event_tx
            .send(VideoEvent::Recording { recording: false });

        let result = tokio::task::spawn_blocking(move || writer.finish()).await;
        match result {
            Ok(Ok(artifacts)) => {
                tracing::info!("Recording finalized: {:?}", artifacts.video_path);
                let _ = self.event_tx.send(VideoEvent::Finished {
                    native_path: artifacts.video_path.to_string_lossy().to_string(),
                    thumbnail: artifacts
                        .thumbnail_path
                        .map(|p| p.to_string_lossy().to_string()),
                });
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to finalize recording: {}", e);
                let resp = ErrorResponse::from(CamError::from(e));
                let _ = self.event_tx.send(VideoEvent::Error {
                    code: resp.code,
                    message: resp.message,
                });
            }
            Err(e) => {
                tracing::error!("Finalize task failed: {}", e);
                let _ = self.event_tx.send(VideoEvent::Error {
                    code: "WRITER_ERROR".to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// React to a device rotation.
    ///
    /// Outside a recording the rotation flows to the sources, the preview,
    /// and the overlay preset. During a recording only the overlay preset
    /// is nudged; the encoded geometry stays locked.
    pub async fn handle_orientation_change(&self, orientation: Orientation) -> CamResult<()> {
        let mut inner = self.inner.lock().await;
        inner.orientation = orientation;

        let Some(session) = inner.session.as_mut() else {
            return Ok(());
        };

        if session.lifecycle().is_recording() {
            session.set_pip_layout(pip_preset(orientation)).await;
        } else {
            session.set_orientation(orientation)?;
            session.set_pip_layout(pip_preset(orientation)).await;
            self.preview.update_geometry(orientation);
        }
        Ok(())
    }
}
