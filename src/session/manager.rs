//! Dual-capture session manager
//!
//! Owns both camera sources, the optional microphone, and the frame router
//! task. The router consumes the tagged source channel, pairs frames from
//! the two cameras, runs the compositor, and feeds the active writer and
//! any pending still captures. All session mutations flow through an
//! explicit control channel into the router.

use super::pairing::PairBuffer;
use super::state::{SessionError, SharedLifecycle};
use crate::capture::source::{AudioSource, CameraProvider, VideoSource};
use crate::capture::types::{
    CameraFacing, FrameFormat, FrameSink, SinkKind, SourceConfig, SourceEvent, VideoFrame,
};
use crate::compositor::{Compositor, MixParams};
use crate::error::CamError;
use crate::geometry::{NormalizedRect, Orientation};
use crate::writer::{encoding_dimensions, MediaWriter};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Capacity of the tagged frame channel; sources drop when it backs up.
const FRAME_CHANNEL_DEPTH: usize = 8;

/// Warn once per this many consecutive composite failures.
const MIX_FAILURE_WARN_EVERY: u64 = 30;

/// Teardown waits for an in-flight configuration transaction, polling at
/// this interval up to the attempt limit.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);
const STOP_POLL_ATTEMPTS: u32 = 50;

/// Output pool size hint handed to the compositor.
const COMPOSITE_BUFFERS: usize = 4;

enum ControlMsg {
    StartRecording {
        writer: Box<dyn MediaWriter>,
        orientation: Orientation,
        audio_enabled: bool,
        ack: oneshot::Sender<Result<(), SessionError>>,
    },
    StopRecording {
        ack: oneshot::Sender<Option<Box<dyn MediaWriter>>>,
    },
    SetLayout(NormalizedRect),
    CaptureStill {
        reply: oneshot::Sender<VideoFrame>,
    },
    Shutdown,
}

/// A live dual-camera session.
pub struct DualSessionManager {
    lifecycle: SharedLifecycle,
    back: Box<dyn VideoSource>,
    front: Box<dyn VideoSource>,
    mic: Option<Box<dyn AudioSource>>,
    ctrl_tx: mpsc::Sender<ControlMsg>,
    router: Option<tokio::task::JoinHandle<()>>,
}

impl DualSessionManager {
    /// Run the configuration transaction: open both cameras, attach all
    /// sinks, and spawn the frame router.
    ///
    /// Camera failures abort the transaction; a missing microphone is
    /// logged and the session continues without audio capture.
    pub async fn setup(
        provider: &dyn CameraProvider,
        compositor: Box<dyn Compositor>,
        config: &SourceConfig,
    ) -> Result<Self, CamError> {
        let lifecycle = SharedLifecycle::new();
        lifecycle.begin_configuring()?;

        let result = Self::attach_all(provider, compositor, config, &lifecycle).await;
        lifecycle.finish_configuring(result.is_ok());
        result
    }

    async fn attach_all(
        provider: &dyn CameraProvider,
        compositor: Box<dyn Compositor>,
        config: &SourceConfig,
        lifecycle: &SharedLifecycle,
    ) -> Result<Self, CamError> {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(8);

        let mut back = provider.open_camera(CameraFacing::Back, config)?;
        let mut front = provider.open_camera(CameraFacing::Front, config)?;

        back.attach(FrameSink::new(SinkKind::Back, frame_tx.clone()))
            .await?;
        front
            .attach(FrameSink::new(SinkKind::Front, frame_tx.clone()))
            .await?;

        let mic = match provider.open_microphone() {
            Ok(mut mic) => match mic.attach(FrameSink::new(SinkKind::Audio, frame_tx)).await {
                Ok(()) => Some(mic),
                Err(e) => {
                    tracing::warn!("Microphone attach failed, continuing without audio: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Microphone unavailable, continuing without audio: {}", e);
                None
            }
        };

        let router = FrameRouter::new(frame_rx, ctrl_rx, compositor, back.format());
        let handle = tokio::spawn(router.run());

        tracing::info!(
            "Dual session configured: {}x{}, mic={}",
            config.desired_width,
            config.desired_height,
            mic.is_some()
        );

        Ok(Self {
            lifecycle: lifecycle.clone(),
            back,
            front,
            mic,
            ctrl_tx,
            router: Some(handle),
        })
    }

    pub fn lifecycle(&self) -> &SharedLifecycle {
        &self.lifecycle
    }

    /// Start frame flow on every attached source.
    pub async fn start_streams(&mut self) -> Result<(), CamError> {
        self.back.start().await?;
        self.front.start().await?;
        if let Some(mic) = self.mic.as_mut() {
            if let Err(e) = mic.start().await {
                tracing::warn!("Microphone start failed, continuing without audio: {}", e);
                self.mic = None;
            }
        }
        Ok(())
    }

    /// Hand a writer to the router and lock geometry for the recording.
    pub async fn start_recording(
        &self,
        writer: Box<dyn MediaWriter>,
        orientation: Orientation,
        audio_enabled: bool,
    ) -> Result<(), SessionError> {
        self.lifecycle.begin_running()?;

        let (ack, ack_rx) = oneshot::channel();
        let sent = self
            .ctrl_tx
            .send(ControlMsg::StartRecording {
                writer,
                orientation: orientation.normalized(),
                audio_enabled,
                ack,
            })
            .await;

        let result = match sent {
            Ok(()) => match ack_rx.await {
                Ok(r) => r,
                Err(_) => Err(SessionError::ChannelClosed),
            },
            Err(_) => Err(SessionError::ChannelClosed),
        };

        if result.is_err() {
            self.lifecycle.end_running();
        }
        result
    }

    /// Detach the active writer, if any, for finalization by the caller.
    ///
    /// The lifecycle transition resolves exactly once, so of two racing
    /// stop paths only one receives the writer.
    pub async fn stop_recording(&self) -> Option<Box<dyn MediaWriter>> {
        if !self.lifecycle.end_running() {
            return None;
        }
        let (ack, ack_rx) = oneshot::channel();
        self.ctrl_tx
            .send(ControlMsg::StopRecording { ack })
            .await
            .ok()?;
        ack_rx.await.ok().flatten()
    }

    /// Ask the router for the next composited frame.
    ///
    /// Returns immediately; the receiver resolves when a frame is
    /// composited, or errors if the router goes away first.
    pub fn request_still_frame(&self) -> oneshot::Receiver<VideoFrame> {
        let (reply, reply_rx) = oneshot::channel();
        if self
            .ctrl_tx
            .try_send(ControlMsg::CaptureStill { reply })
            .is_err()
        {
            tracing::warn!("Still capture request dropped, router unavailable");
        }
        reply_rx
    }

    /// Update the normalized overlay rectangle.
    pub async fn set_pip_layout(&self, layout: NormalizedRect) {
        let _ = self.ctrl_tx.send(ControlMsg::SetLayout(layout)).await;
    }

    /// Propagate a device rotation to the sources.
    ///
    /// Rejected while recording: the encoded geometry is locked at
    /// recording start.
    pub fn set_orientation(&mut self, orientation: Orientation) -> Result<(), SessionError> {
        if self.lifecycle.is_recording() {
            return Err(SessionError::AlreadyRecording);
        }
        self.back.set_orientation(orientation);
        self.front.set_orientation(orientation);
        Ok(())
    }

    /// Toggle the back camera's flash for a still capture. Best-effort;
    /// sources without a flash ignore it.
    pub fn set_flash(&mut self, enabled: bool) {
        self.back.set_flash(enabled);
    }

    /// Whether the session is configured with live streams.
    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_active()
    }

    /// Tear the session down. Safe to call at any time; waits out an
    /// in-flight configuration transaction first.
    pub async fn stop(&mut self) {
        for _ in 0..STOP_POLL_ATTEMPTS {
            if !self.lifecycle.is_configuring() {
                break;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        if self.lifecycle.is_configuring() {
            tracing::warn!("Configuration still in flight after stop wait, tearing down anyway");
        }

        self.lifecycle.begin_stopping();

        // A still-active writer is detached and dropped; its encoder
        // flushes in the background.
        self.back.stop().await;
        self.front.stop().await;
        if let Some(mic) = self.mic.as_mut() {
            mic.stop().await;
        }

        let _ = self.ctrl_tx.send(ControlMsg::Shutdown).await;
        if let Some(handle) = self.router.take() {
            let _ = handle.await;
        }

        self.lifecycle.to_idle();
        tracing::info!("Dual session stopped");
    }
}

struct ActiveRecording {
    writer: Box<dyn MediaWriter>,
    audio_enabled: bool,
}

/// The session's single consumer task; see module docs.
struct FrameRouter {
    frame_rx: mpsc::Receiver<SourceEvent>,
    ctrl_rx: mpsc::Receiver<ControlMsg>,
    compositor: Box<dyn Compositor>,
    input_format: FrameFormat,
    encode_target: Option<(u32, u32)>,
    pairs: PairBuffer,
    params: MixParams,
    recording: Option<ActiveRecording>,
    still_waiters: Vec<oneshot::Sender<VideoFrame>>,
    mix_failures: u64,
}

impl FrameRouter {
    fn new(
        frame_rx: mpsc::Receiver<SourceEvent>,
        ctrl_rx: mpsc::Receiver<ControlMsg>,
        compositor: Box<dyn Compositor>,
        input_format: FrameFormat,
    ) -> Self {
        Self {
            frame_rx,
            ctrl_rx,
            compositor,
            input_format,
            encode_target: None,
            pairs: PairBuffer::new(),
            params: MixParams::default(),
            recording: None,
            still_waiters: Vec::new(),
            mix_failures: 0,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.ctrl_rx.recv() => {
                    match msg {
                        Some(ControlMsg::Shutdown) | None => break,
                        Some(msg) => self.handle_control(msg),
                    }
                }
                event = self.frame_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
            }
        }
        tracing::debug!("Frame router exited");
    }

    fn handle_control(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::StartRecording {
                writer,
                orientation,
                audio_enabled,
                ack,
            } => {
                let target = encoding_dimensions(orientation);
                let result = self
                    .compositor
                    .prepare(self.input_format, COMPOSITE_BUFFERS, Some(target))
                    .map_err(|e| {
                        tracing::error!("Compositor prepare failed: {}", e);
                        SessionError::NotReady
                    });
                if result.is_ok() {
                    self.encode_target = Some(target);
                    self.pairs.clear();
                    self.mix_failures = 0;
                    self.recording = Some(ActiveRecording {
                        writer,
                        audio_enabled,
                    });
                }
                let _ = ack.send(result);
            }
            ControlMsg::StopRecording { ack } => {
                let writer = self.recording.take().map(|r| r.writer);
                // Drop the encode-sized GPU state; a later still capture
                // re-prepares at sensor dimensions.
                self.encode_target = None;
                self.compositor.reset();
                let _ = ack.send(writer);
            }
            ControlMsg::SetLayout(layout) => {
                self.params.layout = layout;
            }
            ControlMsg::CaptureStill { reply } => {
                // Outside a recording, stills composite at sensor
                // dimensions; rotation to the display happens downstream.
                if !self.compositor.is_prepared() {
                    if let Err(e) =
                        self.compositor
                            .prepare(self.input_format, COMPOSITE_BUFFERS, None)
                    {
                        tracing::error!("Compositor prepare for still failed: {}", e);
                        return;
                    }
                }
                self.still_waiters.push(reply);
            }
            ControlMsg::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Video { kind, frame } => {
                self.pairs.put(kind, frame);
                self.composite_if_needed();
            }
            SourceEvent::Audio(chunk) => {
                if let Some(rec) = &self.recording {
                    if rec.audio_enabled {
                        rec.writer.append_audio(&chunk);
                    }
                }
            }
        }
    }

    /// Composite the pending pair when someone will consume the result.
    fn composite_if_needed(&mut self) {
        if self.recording.is_none() && self.still_waiters.is_empty() {
            return;
        }
        let Some((back, front)) = self.pairs.take_pair() else {
            return;
        };

        // The device may have negotiated a format other than the one
        // requested; rebuild the compositor state around what actually
        // arrives on the full-screen stream.
        if back.format != self.input_format {
            tracing::info!(
                "Capture format renegotiated: {}x{} -> {}x{}",
                self.input_format.width,
                self.input_format.height,
                back.format.width,
                back.format.height
            );
            self.input_format = back.format;
            self.compositor.reset();
            if let Err(e) =
                self.compositor
                    .prepare(self.input_format, COMPOSITE_BUFFERS, self.encode_target)
            {
                tracing::error!("Compositor re-prepare failed: {}", e);
                return;
            }
        }

        match self.compositor.mix(&back, &front, &self.params) {
            Some(mixed) => {
                self.mix_failures = 0;
                if let Some(rec) = &self.recording {
                    rec.writer.append_video(&mixed, mixed.pts);
                }
                for waiter in self.still_waiters.drain(..) {
                    let _ = waiter.send(mixed.clone());
                }
            }
            None => {
                // A failed mix skips the frame; the streams stay healthy.
                self.mix_failures += 1;
                if self.mix_failures % MIX_FAILURE_WARN_EVERY == 0 {
                    tracing::warn!(
                        "Compositor skipped {} consecutive frame pairs",
                        self.mix_failures
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::pip_preset;
    use crate::testing::{CountingWriter, FakeCameraProvider, FakeCompositor};

    #[tokio::test]
    async fn test_setup_reaches_ready() {
        let (provider, _rig) = FakeCameraProvider::with_rig();
        let manager = DualSessionManager::setup(
            &provider,
            Box::new(FakeCompositor::new()),
            &SourceConfig::default(),
        )
        .await
        .unwrap();

        assert!(manager.lifecycle().is_active());
        assert!(!manager.lifecycle().is_recording());
    }

    #[tokio::test]
    async fn test_recording_routes_composited_frames_to_writer() {
        let (provider, rig) = FakeCameraProvider::with_rig();
        let mut manager = DualSessionManager::setup(
            &provider,
            Box::new(FakeCompositor::new()),
            &SourceConfig::default(),
        )
        .await
        .unwrap();
        manager.start_streams().await.unwrap();

        let writer = CountingWriter::boxed();
        let counts = writer.counts();
        manager
            .start_recording(writer, Orientation::Portrait, true)
            .await
            .unwrap();

        rig.emit_pair().await;
        rig.emit_pair().await;
        tokio::task::yield_now().await;

        let returned = manager.stop_recording().await;
        assert!(returned.is_some());
        assert!(counts.video() >= 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_still_capture_yields_one_frame() {
        let (provider, rig) = FakeCameraProvider::with_rig();
        let mut manager = DualSessionManager::setup(
            &provider,
            Box::new(FakeCompositor::new()),
            &SourceConfig::default(),
        )
        .await
        .unwrap();
        manager.start_streams().await.unwrap();

        let pending = manager.request_still_frame();
        rig.emit_pair().await;

        let frame = pending.await.unwrap();
        assert_eq!(
            frame.format,
            FrameFormat::bgra(crate::testing::FAKE_WIDTH, crate::testing::FAKE_HEIGHT)
        );
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_orientation_change_rejected_while_recording() {
        let (provider, _rig) = FakeCameraProvider::with_rig();
        let mut manager = DualSessionManager::setup(
            &provider,
            Box::new(FakeCompositor::new()),
            &SourceConfig::default(),
        )
        .await
        .unwrap();
        manager.start_streams().await.unwrap();

        manager
            .start_recording(CountingWriter::boxed(), Orientation::Portrait, false)
            .await
            .unwrap();

        let err = manager.set_orientation(Orientation::LandscapeLeft);
        assert!(matches!(err, Err(SessionError::AlreadyRecording)));

        manager.stop_recording().await;
        manager.set_orientation(Orientation::LandscapeLeft).unwrap();
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_second_recording_start_is_rejected() {
        let (provider, _rig) = FakeCameraProvider::with_rig();
        let mut manager = DualSessionManager::setup(
            &provider,
            Box::new(FakeCompositor::new()),
            &SourceConfig::default(),
        )
        .await
        .unwrap();
        manager.start_streams().await.unwrap();

        manager
            .start_recording(CountingWriter::boxed(), Orientation::Portrait, false)
            .await
            .unwrap();
        let second = manager
            .start_recording(CountingWriter::boxed(), Orientation::Portrait, false)
            .await;
        assert!(matches!(second, Err(SessionError::AlreadyRecording)));
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_frames_without_consumer_are_not_composited() {
        let (provider, rig) = FakeCameraProvider::with_rig();
        let compositor = FakeCompositor::new();
        let mixes = compositor.mix_count();
        let mut manager = DualSessionManager::setup(
            &provider,
            Box::new(compositor),
            &SourceConfig::default(),
        )
        .await
        .unwrap();
        manager.start_streams().await.unwrap();

        rig.emit_pair().await;
        tokio::task::yield_now().await;
        assert_eq!(mixes.load(std::sync::atomic::Ordering::SeqCst), 0);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (provider, _rig) = FakeCameraProvider::with_rig();
        let mut manager = DualSessionManager::setup(
            &provider,
            Box::new(FakeCompositor::new()),
            &SourceConfig::default(),
        )
        .await
        .unwrap();
        manager.stop().await;
        manager.stop().await;
        assert!(!manager.lifecycle().is_active());
    }

    #[test]
    fn test_manager_is_shareable_across_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DualSessionManager>();
    }

    #[tokio::test]
    async fn test_stop_waits_out_configuration_transaction() {
        let (provider, _rig) = FakeCameraProvider::with_rig();
        let mut manager = DualSessionManager::setup(
            &provider,
            Box::new(FakeCompositor::new()),
            &SourceConfig::default(),
        )
        .await
        .unwrap();

        // Wind the lifecycle back into a configuration transaction so the
        // teardown races it.
        let lifecycle = manager.lifecycle().clone();
        lifecycle.to_idle();
        lifecycle.begin_configuring().unwrap();

        let release = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                lifecycle.finish_configuring(true);
            })
        };

        let started = std::time::Instant::now();
        manager.stop().await;
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(!manager.lifecycle().is_active());
        assert!(!manager.lifecycle().is_configuring());
        release.await.unwrap();
    }

    #[tokio::test]
    async fn test_renegotiated_capture_format_still_reaches_writer() {
        let (provider, rig) = FakeCameraProvider::with_rig();
        let mut manager = DualSessionManager::setup(
            &provider,
            Box::new(FakeCompositor::new()),
            &SourceConfig::default(),
        )
        .await
        .unwrap();
        manager.start_streams().await.unwrap();

        let writer = CountingWriter::boxed();
        let counts = writer.counts();
        manager
            .start_recording(writer, Orientation::Portrait, false)
            .await
            .unwrap();

        // The device delivers a different size than the sources announced.
        rig.emit_pair_sized(320, 240).await;
        rig.emit_pair_sized(320, 240).await;
        tokio::task::yield_now().await;

        assert!(manager.stop_recording().await.is_some());
        assert!(counts.video() >= 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_layout_update_reaches_router() {
        // Routed through the control channel; verified indirectly by the
        // send not erroring while the router is alive.
        let (provider, _rig) = FakeCameraProvider::with_rig();
        let manager = DualSessionManager::setup(
            &provider,
            Box::new(FakeCompositor::new()),
            &SourceConfig::default(),
        )
        .await
        .unwrap();
        manager.set_pip_layout(pip_preset(Orientation::LandscapeLeft)).await;
    }
}
