//! Capture data types
//!
//! Frames, audio chunks, and the tagged channel used to deliver them from
//! capture sources to the session's frame router.

use crate::compositor::pool::PooledBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Which sink a captured buffer belongs to.
///
/// Sources tag every event they emit; consumers dispatch on the tag instead
/// of comparing output identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Back,
    Front,
    Audio,
}

/// Pixel layout of a video frame. The capture pipeline runs entirely in
/// 8-bit BGRA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
        }
    }
}

/// Dimensions and pixel layout of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub pixel: PixelFormat,
}

impl FrameFormat {
    pub fn bgra(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel: PixelFormat::Bgra8,
        }
    }

    /// Byte length of one frame in this format.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel.bytes_per_pixel()
    }
}

/// Backing storage for a frame's pixel data.
#[derive(Debug)]
pub enum PixelData {
    /// Freshly allocated by a capture source.
    Heap(Vec<u8>),
    /// Borrowed from a compositor output pool; returns to the pool when the
    /// last frame handle drops.
    Pooled(PooledBuffer),
}

impl PixelData {
    pub fn bytes(&self) -> &[u8] {
        match self {
            PixelData::Heap(v) => v,
            PixelData::Pooled(b) => b.bytes(),
        }
    }
}

/// One captured or composited video frame.
///
/// Cheap to clone; the pixel data is shared.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Arc<PixelData>,
    pub format: FrameFormat,
    /// Presentation time relative to the source's stream start.
    pub pts: Duration,
}

impl VideoFrame {
    pub fn new(format: FrameFormat, data: Vec<u8>, pts: Duration) -> Self {
        Self {
            data: Arc::new(PixelData::Heap(data)),
            format,
            pts,
        }
    }

    pub fn from_pooled(format: FrameFormat, buffer: PooledBuffer, pts: Duration) -> Self {
        Self {
            data: Arc::new(PixelData::Pooled(buffer)),
            format,
            pts,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.bytes()
    }
}

/// A chunk of captured microphone audio, mono 16-bit PCM.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub pts: Duration,
}

/// Event emitted by a capture source into the session's frame channel.
#[derive(Debug)]
pub enum SourceEvent {
    Video { kind: SinkKind, frame: VideoFrame },
    Audio(AudioChunk),
}

/// Sending half handed to a capture source at attach time.
///
/// Delivery is best-effort: if the session channel is backed up the event
/// is dropped rather than queued, keeping capture real-time.
#[derive(Debug, Clone)]
pub struct FrameSink {
    kind: SinkKind,
    tx: mpsc::Sender<SourceEvent>,
}

impl FrameSink {
    pub fn new(kind: SinkKind, tx: mpsc::Sender<SourceEvent>) -> Self {
        Self { kind, tx }
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    /// Deliver a video frame; drops it if the channel is full or closed.
    pub fn send_video(&self, frame: VideoFrame) {
        let event = SourceEvent::Video {
            kind: self.kind,
            frame,
        };
        if let Err(e) = self.tx.try_send(event) {
            tracing::trace!("Dropping {:?} frame: {}", self.kind, e);
        }
    }

    /// Deliver an audio chunk; same drop policy as video.
    pub fn send_audio(&self, chunk: AudioChunk) {
        if let Err(e) = self.tx.try_send(SourceEvent::Audio(chunk)) {
            tracing::trace!("Dropping audio chunk: {}", e);
        }
    }
}

/// A last-known geolocation fix attached to still captures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level; negative below.
    pub altitude_m: Option<f64>,
    /// Ground speed in metres per second.
    pub speed_mps: Option<f64>,
    /// Course over ground in degrees from true north.
    pub course_deg: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Information about an available camera device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
    pub facing: CameraFacing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraFacing {
    Back,
    Front,
}

/// Requested capture configuration for one camera source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub desired_width: u32,
    pub desired_height: u32,
    pub fps: u32,
    /// Horizontal mirror, applied to the front camera.
    pub mirrored: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            desired_width: 1920,
            desired_height: 1080,
            fps: 30,
            mirrored: false,
        }
    }
}

/// Errors raised by capture sources and device discovery.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to attach {0}")]
    Attach(String),

    #[error("source already started")]
    AlreadyStarted,

    #[error("source error: {0}")]
    Source(String),
}
