//! Test doubles for the capture pipeline
//!
//! In-process fakes for the camera provider, compositor, writer, preview,
//! and location collaborators. The [`FakeRig`] drives frames into whatever
//! sinks the session attached, so tests control exactly when and what the
//! pipeline sees.

use crate::capture::source::{
    AudioSource, CameraProvider, LocationProvider, PreviewPlacement, VideoSource,
};
use crate::capture::types::{
    AudioChunk, CameraFacing, CameraInfo, CaptureError, FrameFormat, FrameSink, GeoFix,
    SourceConfig, VideoFrame,
};
use crate::compositor::{Compositor, CompositorError, CompositorFactory, MixParams};
use crate::geometry::Orientation;
use crate::writer::{MediaWriter, RecordingArtifacts, WriterError, WriterFactory, WriterOptions};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Frame dimensions the fake cameras report.
pub const FAKE_WIDTH: u32 = 64;
pub const FAKE_HEIGHT: u32 = 48;

/// Build a correctly sized BGRA frame filled with one byte value.
pub fn bgra_frame(width: u32, height: u32, fill: u8, pts: Duration) -> VideoFrame {
    let format = FrameFormat::bgra(width, height);
    VideoFrame::new(format, vec![fill; format.byte_len()], pts)
}

#[derive(Default)]
struct RigInner {
    back: Option<FrameSink>,
    front: Option<FrameSink>,
    audio: Option<FrameSink>,
    frames_emitted: u64,
    last_orientation: Option<Orientation>,
    flash_events: Vec<bool>,
}

/// Shared handle that feeds frames into the attached sinks.
#[derive(Clone, Default)]
pub struct FakeRig {
    inner: Arc<Mutex<RigInner>>,
}

impl FakeRig {
    /// Send one frame to each camera sink, then let the router run.
    pub async fn emit_pair(&self) {
        self.emit_pair_sized(FAKE_WIDTH, FAKE_HEIGHT).await;
    }

    /// Like [`emit_pair`](Self::emit_pair) with explicit frame dimensions,
    /// for exercising capture formats the sources did not announce.
    pub async fn emit_pair_sized(&self, width: u32, height: u32) {
        {
            let mut inner = self.inner.lock();
            let n = inner.frames_emitted;
            inner.frames_emitted += 1;
            let pts = Duration::from_millis(n * 33);
            if let Some(back) = &inner.back {
                back.send_video(bgra_frame(width, height, 0x20, pts));
            }
            if let Some(front) = &inner.front {
                front.send_video(bgra_frame(width, height, 0x80, pts));
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    /// Send one audio chunk, then let the router run.
    pub async fn emit_audio(&self, samples: Vec<i16>) {
        {
            let inner = self.inner.lock();
            if let Some(audio) = &inner.audio {
                audio.send_audio(AudioChunk {
                    samples,
                    sample_rate: 44_100,
                    pts: Duration::ZERO,
                });
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    /// Last orientation any fake source was told about.
    pub fn last_orientation(&self) -> Option<Orientation> {
        self.inner.lock().last_orientation
    }

    /// Flash toggles the back source received, in order.
    pub fn flash_events(&self) -> Vec<bool> {
        self.inner.lock().flash_events.clone()
    }
}

struct FakeVideoSource {
    facing: CameraFacing,
    rig: FakeRig,
    started: bool,
}

#[async_trait]
impl VideoSource for FakeVideoSource {
    fn format(&self) -> FrameFormat {
        FrameFormat::bgra(FAKE_WIDTH, FAKE_HEIGHT)
    }

    async fn attach(&mut self, sink: FrameSink) -> Result<(), CaptureError> {
        let mut inner = self.rig.inner.lock();
        match self.facing {
            CameraFacing::Back => inner.back = Some(sink),
            CameraFacing::Front => inner.front = Some(sink),
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.started {
            return Err(CaptureError::AlreadyStarted);
        }
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) {
        self.started = false;
    }

    fn set_orientation(&mut self, orientation: Orientation) {
        self.rig.inner.lock().last_orientation = Some(orientation);
    }

    fn set_flash(&mut self, enabled: bool) {
        self.rig.inner.lock().flash_events.push(enabled);
    }
}

struct FakeAudioSource {
    rig: FakeRig,
}

#[async_trait]
impl AudioSource for FakeAudioSource {
    async fn attach(&mut self, sink: FrameSink) -> Result<(), CaptureError> {
        self.rig.inner.lock().audio = Some(sink);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn stop(&mut self) {}
}

/// A camera provider with two fake cameras and a fake microphone.
pub struct FakeCameraProvider {
    rig: FakeRig,
    dual_capable: bool,
    mic_available: bool,
}

impl FakeCameraProvider {
    pub fn with_rig() -> (Self, FakeRig) {
        let rig = FakeRig::default();
        (
            Self {
                rig: rig.clone(),
                dual_capable: true,
                mic_available: true,
            },
            rig,
        )
    }

    /// A provider that reports no dual-capture capability.
    pub fn single_camera() -> Self {
        Self {
            rig: FakeRig::default(),
            dual_capable: false,
            mic_available: true,
        }
    }

    /// A provider whose microphone fails to open.
    pub fn without_microphone() -> (Self, FakeRig) {
        let rig = FakeRig::default();
        (
            Self {
                rig: rig.clone(),
                dual_capable: true,
                mic_available: false,
            },
            rig,
        )
    }
}

impl CameraProvider for FakeCameraProvider {
    fn list_cameras(&self) -> Vec<CameraInfo> {
        let mut cameras = vec![CameraInfo {
            id: "0".to_string(),
            name: "Fake Back Camera".to_string(),
            facing: CameraFacing::Back,
        }];
        if self.dual_capable {
            cameras.push(CameraInfo {
                id: "1".to_string(),
                name: "Fake Front Camera".to_string(),
                facing: CameraFacing::Front,
            });
        }
        cameras
    }

    fn supports_dual_capture(&self) -> bool {
        self.dual_capable
    }

    fn open_camera(
        &self,
        facing: CameraFacing,
        _config: &SourceConfig,
    ) -> Result<Box<dyn VideoSource>, CaptureError> {
        if facing == CameraFacing::Front && !self.dual_capable {
            return Err(CaptureError::DeviceNotFound("front camera".to_string()));
        }
        Ok(Box::new(FakeVideoSource {
            facing,
            rig: self.rig.clone(),
            started: false,
        }))
    }

    fn open_microphone(&self) -> Result<Box<dyn AudioSource>, CaptureError> {
        if !self.mic_available {
            return Err(CaptureError::DeviceNotFound("microphone".to_string()));
        }
        Ok(Box::new(FakeAudioSource {
            rig: self.rig.clone(),
        }))
    }
}

/// CPU stand-in for the GPU compositor: produces zeroed frames of the
/// prepared output size and counts mixes.
pub struct FakeCompositor {
    prepared: Option<(FrameFormat, (u32, u32))>,
    mixes: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl FakeCompositor {
    pub fn new() -> Self {
        Self {
            prepared: None,
            mixes: Arc::new(AtomicU64::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mix_count(&self) -> Arc<AtomicU64> {
        self.mixes.clone()
    }

    /// Handle that flips every subsequent `mix` into a failure.
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        self.failing.clone()
    }
}

impl Default for FakeCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor for FakeCompositor {
    fn prepare(
        &mut self,
        format: FrameFormat,
        _buffer_count_hint: usize,
        target: Option<(u32, u32)>,
    ) -> Result<(), CompositorError> {
        let out = target.unwrap_or((format.width, format.height));
        self.prepared = Some((format, out));
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    fn reset(&mut self) {
        self.prepared = None;
    }

    fn mix(
        &mut self,
        full: &VideoFrame,
        _pip: &VideoFrame,
        _params: &MixParams,
    ) -> Option<VideoFrame> {
        let (input, (width, height)) = self.prepared?;
        // Like the GPU path, a frame that does not match the prepared
        // input format is skipped.
        if full.format != input {
            return None;
        }
        if self.failing.load(Ordering::SeqCst) {
            return None;
        }
        self.mixes.fetch_add(1, Ordering::SeqCst);
        Some(bgra_frame(width, height, 0x40, full.pts))
    }
}

/// Factory whose created compositors share one mix counter.
#[derive(Default)]
pub struct FakeCompositorFactory {
    mixes: Arc<AtomicU64>,
}

impl FakeCompositorFactory {
    pub fn mix_count(&self) -> Arc<AtomicU64> {
        self.mixes.clone()
    }
}

impl CompositorFactory for FakeCompositorFactory {
    fn create(&self) -> Result<Box<dyn Compositor>, CompositorError> {
        let mut compositor = FakeCompositor::new();
        compositor.mixes = self.mixes.clone();
        Ok(Box::new(compositor))
    }
}

/// Shared counters observed after a [`CountingWriter`] is consumed.
#[derive(Clone, Default)]
pub struct WriterCounts {
    video: Arc<AtomicU64>,
    audio: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
}

impl WriterCounts {
    pub fn video(&self) -> u64 {
        self.video.load(Ordering::SeqCst)
    }

    pub fn audio(&self) -> u64 {
        self.audio.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Writer that records appended frame counts instead of encoding.
pub struct CountingWriter {
    counts: WriterCounts,
    artifacts: RecordingArtifacts,
}

impl CountingWriter {
    pub fn boxed() -> Box<CountingWriter> {
        Box::new(Self {
            counts: WriterCounts::default(),
            artifacts: RecordingArtifacts {
                video_path: PathBuf::from("counting_dual.mp4"),
                thumbnail_path: None,
            },
        })
    }

    pub fn counts(&self) -> WriterCounts {
        self.counts.clone()
    }
}

impl MediaWriter for CountingWriter {
    fn append_video(&self, _frame: &VideoFrame, _pts: Duration) {
        self.counts.video.fetch_add(1, Ordering::SeqCst);
    }

    fn append_audio(&self, _chunk: &AudioChunk) {
        self.counts.audio.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(self: Box<Self>) -> Result<RecordingArtifacts, WriterError> {
        self.counts.finished.store(true, Ordering::SeqCst);
        Ok(self.artifacts)
    }
}

/// Factory handing out counting writers and remembering what was asked.
#[derive(Default)]
pub struct CountingWriterFactory {
    last_options: Mutex<Option<WriterOptions>>,
    last_counts: Mutex<Option<WriterCounts>>,
}

impl CountingWriterFactory {
    pub fn last_options(&self) -> Option<WriterOptions> {
        self.last_options.lock().clone()
    }

    pub fn last_counts(&self) -> Option<WriterCounts> {
        self.last_counts.lock().clone()
    }
}

impl WriterFactory for CountingWriterFactory {
    fn create(&self, options: &WriterOptions) -> Result<Box<dyn MediaWriter>, WriterError> {
        let writer = CountingWriter {
            counts: WriterCounts::default(),
            artifacts: RecordingArtifacts {
                video_path: options.output_dir.join("counting_dual.mp4"),
                thumbnail_path: None,
            },
        };
        *self.last_options.lock() = Some(options.clone());
        *self.last_counts.lock() = Some(writer.counts());
        Ok(Box::new(writer))
    }
}

/// Preview placement that only counts calls.
#[derive(Default)]
pub struct NullPreview {
    placed: AtomicU64,
    torn_down: AtomicU64,
}

impl NullPreview {
    pub fn placed(&self) -> u64 {
        self.placed.load(Ordering::SeqCst)
    }

    pub fn torn_down(&self) -> u64 {
        self.torn_down.load(Ordering::SeqCst)
    }
}

impl PreviewPlacement for NullPreview {
    fn place(&self) -> Result<(), CaptureError> {
        self.placed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn update_geometry(&self, _orientation: Orientation) {}

    fn teardown(&self) {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
    }
}

/// Location provider returning a fixed, optional fix.
pub struct FixedLocation(pub Option<GeoFix>);

impl LocationProvider for FixedLocation {
    fn last_known_fix(&self) -> Option<GeoFix> {
        self.0.clone()
    }
}
