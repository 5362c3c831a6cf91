//! Frame compositing module
//!
//! Merges the two camera streams into a single picture-in-picture frame.
//! The [`Compositor`] trait keeps the GPU path swappable; `gpu` holds the
//! wgpu compute implementation and `pool` the output buffer pool.

pub mod gpu;
pub mod pool;

use crate::capture::types::{FrameFormat, VideoFrame};
use crate::geometry::{NormalizedRect, Orientation, PixelRect};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("compositor is not prepared")]
    NotPrepared,

    #[error("unsupported frame format: {0}x{1}")]
    UnsupportedFormat(u32, u32),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("output buffer pool exhausted")]
    PoolExhausted,
}

/// Per-mix parameters supplied by the frame router.
#[derive(Debug, Clone, Copy)]
pub struct MixParams {
    /// Overlay rectangle, normalized against the full-screen frame.
    pub layout: NormalizedRect,
    /// When set, the front stream fills the frame and the back stream is
    /// the overlay.
    pub front_is_full_screen: bool,
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            layout: crate::geometry::pip_preset(Orientation::Portrait),
            front_is_full_screen: false,
        }
    }
}

impl MixParams {
    /// Resolve the overlay rectangle in pixels of the full-screen frame.
    pub fn overlay_rect(&self, full: &FrameFormat) -> PixelRect {
        self.layout.scaled_to(full.width, full.height)
    }
}

/// Two-stream picture-in-picture mixer.
///
/// `prepare` allocates GPU state and the output pool for a fixed frame
/// format; `mix` is the per-frame hot path and must never block on
/// allocation. A failed mix yields `None` and the frame is skipped, the
/// stream itself stays healthy.
pub trait Compositor: Send {
    /// Allocate resources for the given input format. `target` optionally
    /// fixes the output dimensions (e.g. the encoder's); otherwise output
    /// matches the full-screen input.
    fn prepare(
        &mut self,
        format: FrameFormat,
        buffer_count_hint: usize,
        target: Option<(u32, u32)>,
    ) -> Result<(), CompositorError>;

    fn is_prepared(&self) -> bool;

    /// Release all prepared resources. `prepare` may be called again.
    fn reset(&mut self);

    /// Merge one full-screen and one overlay frame.
    ///
    /// Returns `None` when the compositor is unprepared, the formats do not
    /// match the prepared ones, or no output buffer is available. Callers
    /// skip the frame in all of these cases.
    fn mix(&mut self, full: &VideoFrame, pip: &VideoFrame, params: &MixParams)
        -> Option<VideoFrame>;
}

/// Constructs a compositor at dual-mode setup time.
pub trait CompositorFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Compositor>, CompositorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::pip_preset;

    #[test]
    fn test_overlay_rect_scales_against_full_frame() {
        let params = MixParams {
            layout: NormalizedRect::new(0.5, 0.25, 0.25, 0.5),
            front_is_full_screen: false,
        };
        let rect = params.overlay_rect(&FrameFormat::bgra(1080, 1920));
        assert_eq!(rect.x, 540.0);
        assert_eq!(rect.y, 480.0);
        assert_eq!(rect.width, 270.0);
        assert_eq!(rect.height, 960.0);
    }

    #[test]
    fn test_default_params_use_portrait_preset() {
        let params = MixParams::default();
        assert_eq!(params.layout, pip_preset(Orientation::Portrait));
        assert!(!params.front_is_full_screen);
    }
}
