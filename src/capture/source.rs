//! Capture source trait definitions
//!
//! Platform-agnostic traits for camera and microphone sources plus the
//! external collaborators the orchestrator talks to. Sources push tagged
//! events into a [`FrameSink`](super::types::FrameSink); nothing in the
//! pipeline holds a back-reference into a source.

use super::types::{
    CameraFacing, CameraInfo, CaptureError, FrameFormat, FrameSink, GeoFix, SourceConfig,
};
use crate::geometry::Orientation;
use async_trait::async_trait;

/// A single camera video pipeline.
///
/// Lifecycle: `attach` wires the sink during the session's configuration
/// transaction, `start`/`stop` control frame flow. All calls are made from
/// the session's execution context only.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Requested capture format. The device may negotiate something else;
    /// the dimensions that actually apply arrive tagged on each frame.
    fn format(&self) -> FrameFormat;

    /// Wire the delivery sink. Called once, inside a configuration
    /// transaction; no frames may be delivered before `start`.
    async fn attach(&mut self, sink: FrameSink) -> Result<(), CaptureError>;

    async fn start(&mut self) -> Result<(), CaptureError>;

    async fn stop(&mut self);

    /// Update the orientation metadata tagged onto produced frames.
    fn set_orientation(&mut self, orientation: Orientation);

    /// Toggle the device flash, when the hardware has one.
    fn set_flash(&mut self, _enabled: bool) {}
}

/// A microphone audio pipeline.
#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn attach(&mut self, sink: FrameSink) -> Result<(), CaptureError>;

    async fn start(&mut self) -> Result<(), CaptureError>;

    async fn stop(&mut self);
}

/// Device discovery and source construction.
pub trait CameraProvider: Send + Sync {
    fn list_cameras(&self) -> Vec<CameraInfo>;

    /// Whether the device can run both cameras concurrently.
    fn supports_dual_capture(&self) -> bool;

    fn open_camera(
        &self,
        facing: CameraFacing,
        config: &SourceConfig,
    ) -> Result<Box<dyn VideoSource>, CaptureError>;

    fn open_microphone(&self) -> Result<Box<dyn AudioSource>, CaptureError>;
}

/// External collaborator placing the on-screen preview layers.
///
/// The orchestrator only requests placement and teardown; geometry and
/// styling live entirely on the host side.
pub trait PreviewPlacement: Send + Sync {
    fn place(&self) -> Result<(), CaptureError>;

    fn update_geometry(&self, orientation: Orientation);

    fn teardown(&self);
}

/// External collaborator providing the last-known geolocation fix.
pub trait LocationProvider: Send + Sync {
    fn last_known_fix(&self) -> Option<GeoFix>;
}
