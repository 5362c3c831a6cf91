//! Dual-camera capture, compositing, and recording.
//!
//! Runs both cameras in one session, merges them into a single
//! picture-in-picture stream on the GPU, and produces geotagged still
//! photos and duration-limited MP4 recordings. The
//! [`CaptureOrchestrator`](orchestrator::CaptureOrchestrator) is the
//! entry point; hosts observe progress over its broadcast event channel.

pub mod capture;
pub mod compositor;
pub mod error;
pub mod geometry;
pub mod orchestrator;
pub mod session;
pub mod still;
pub mod testing;
pub mod writer;

pub use capture::camera::NokhwaCameraProvider;
pub use capture::{CameraProvider, LocationProvider, PreviewPlacement};
pub use compositor::gpu::WgpuCompositorFactory;
pub use error::{CamError, CamResult, ErrorResponse};
pub use geometry::{NormalizedRect, Orientation};
pub use orchestrator::{CaptureOrchestrator, RecordingOptions, StillOptions, VideoEvent};
pub use writer::stream::StreamWriterFactory;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for binaries and integration tests.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dualcam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
