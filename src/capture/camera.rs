//! Camera capture using nokhwa
//!
//! Each opened camera runs a dedicated capture thread: frames are decoded
//! to RGBA, swizzled to BGRA, optionally mirrored, and pushed into the
//! session's frame channel. The camera device itself is opened inside the
//! thread, nokhwa handles are not sendable across threads.

use super::source::{AudioSource, CameraProvider, VideoSource};
use super::types::{
    CameraFacing, CameraInfo, CaptureError, FrameFormat, FrameSink, SourceConfig, VideoFrame,
};
use crate::geometry::Orientation;
use async_trait::async_trait;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat as NokhwaFrameFormat, RequestedFormat,
    RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Enumerate cameras, assigning facing by device order.
///
/// Desktop backends expose no facing metadata; the first camera is treated
/// as back-facing and the second as front-facing.
pub fn list_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .enumerate()
            .map(|(i, info)| {
                let id = match info.index() {
                    CameraIndex::Index(idx) => idx.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
                    facing: if i == 0 {
                        CameraFacing::Back
                    } else {
                        CameraFacing::Front
                    },
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Swizzle an RGBA buffer to BGRA in place, mirroring each row when asked.
fn rgba_to_bgra(buf: &mut [u8], width: u32, mirror: bool) {
    for px in buf.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    if mirror {
        let row_len = width as usize * 4;
        for row in buf.chunks_exact_mut(row_len) {
            let (mut left, mut right) = (0usize, width as usize - 1);
            while left < right {
                for c in 0..4 {
                    row.swap(left * 4 + c, right * 4 + c);
                }
                left += 1;
                right -= 1;
            }
        }
    }
}

/// A single nokhwa-backed camera pipeline.
pub struct NokhwaVideoSource {
    index: CameraIndex,
    config: SourceConfig,
    sink: Option<FrameSink>,
    running: Arc<AtomicBool>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
    orientation: Orientation,
}

impl NokhwaVideoSource {
    pub fn new(index: CameraIndex, config: SourceConfig) -> Self {
        Self {
            index,
            config,
            sink: None,
            running: Arc::new(AtomicBool::new(false)),
            capture_thread: None,
            orientation: Orientation::Portrait,
        }
    }
}

#[async_trait]
impl VideoSource for NokhwaVideoSource {
    fn format(&self) -> FrameFormat {
        FrameFormat::bgra(self.config.desired_width, self.config.desired_height)
    }

    async fn attach(&mut self, sink: FrameSink) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStarted);
        }
        self.sink = Some(sink);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStarted);
        }
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| CaptureError::Attach("camera source has no sink".to_string()))?;

        self.running.store(true, Ordering::SeqCst);

        let index = self.index.clone();
        let running = self.running.clone();
        let expected = self.format();
        let mirror = self.config.mirrored;
        let fps = self.config.fps;

        let handle = std::thread::spawn(move || {
            let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(
                CameraFormat::new(
                    Resolution::new(expected.width, expected.height),
                    NokhwaFrameFormat::MJPEG,
                    fps,
                ),
            ));

            let mut camera = match Camera::new(index.clone(), requested) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to open camera {:?}: {:?}", index, e);
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            if let Err(e) = camera.open_stream() {
                tracing::error!("Failed to open camera stream: {:?}", e);
                running.store(false, Ordering::SeqCst);
                return;
            }

            let actual = camera.camera_format();
            tracing::info!(
                "Camera {:?} opened: {}x{} @ {}fps (requested {}x{} @ {}fps)",
                index,
                actual.resolution().width(),
                actual.resolution().height(),
                actual.frame_rate(),
                expected.width,
                expected.height,
                fps
            );

            let capture_start = Instant::now();
            let mut frame_count: u64 = 0;

            while running.load(Ordering::SeqCst) {
                // Blocks until the camera delivers the next frame; the
                // device controls pacing.
                match camera.frame() {
                    Ok(frame) => match frame.decode_image::<RgbAFormat>() {
                        Ok(decoded) => {
                            let width = decoded.width();
                            let height = decoded.height();
                            let mut data = decoded.into_raw();
                            rgba_to_bgra(&mut data, width, mirror);
                            sink.send_video(VideoFrame::new(
                                FrameFormat::bgra(width, height),
                                data,
                                capture_start.elapsed(),
                            ));
                            frame_count += 1;
                        }
                        Err(e) => {
                            tracing::debug!("Failed to decode camera frame: {:?}", e);
                        }
                    },
                    Err(e) => {
                        tracing::debug!("Failed to capture frame: {:?}", e);
                    }
                }
            }

            if let Err(e) = camera.stop_stream() {
                tracing::warn!("Error stopping camera stream: {:?}", e);
            }

            let elapsed = capture_start.elapsed();
            tracing::info!(
                "Camera {:?} delivered {} frames in {:.2}s",
                index,
                frame_count,
                elapsed.as_secs_f64()
            );
        });

        self.capture_thread = Some(handle);
        Ok(())
    }

    async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
    }

    fn set_orientation(&mut self, orientation: Orientation) {
        // Desktop sensors deliver upright frames; the hint only informs
        // logging here.
        if self.orientation != orientation {
            tracing::debug!("Camera orientation hint: {:?}", orientation);
            self.orientation = orientation;
        }
    }
}

/// Device discovery backed by nokhwa plus the cpal default microphone.
pub struct NokhwaCameraProvider;

impl CameraProvider for NokhwaCameraProvider {
    fn list_cameras(&self) -> Vec<CameraInfo> {
        list_cameras()
    }

    fn supports_dual_capture(&self) -> bool {
        self.list_cameras().len() >= 2
    }

    fn open_camera(
        &self,
        facing: CameraFacing,
        config: &SourceConfig,
    ) -> Result<Box<dyn VideoSource>, CaptureError> {
        let cameras = self.list_cameras();
        let info = cameras
            .iter()
            .find(|c| c.facing == facing)
            .ok_or_else(|| CaptureError::DeviceNotFound(format!("{:?} camera", facing)))?;

        let index = match info.id.parse::<u32>() {
            Ok(i) => CameraIndex::Index(i),
            Err(_) => CameraIndex::String(info.id.clone()),
        };

        let mut config = config.clone();
        // Mirror the front stream so the overlay matches what the user sees.
        config.mirrored = facing == CameraFacing::Front;

        Ok(Box::new(NokhwaVideoSource::new(index, config)))
    }

    fn open_microphone(&self) -> Result<Box<dyn AudioSource>, CaptureError> {
        Ok(Box::new(super::audio::CpalAudioSource::new()))
    }
}
