//! Orientation handling and PiP layout geometry
//!
//! Defines the normalized picture-in-picture rectangle and the device
//! orientation model used for layout and encoding decisions.

use serde::{Deserialize, Serialize};

/// Physical device orientation as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
    FaceUp,
    FaceDown,
    Unknown,
}

impl Default for Orientation {
    fn default() -> Self {
        Self::Portrait
    }
}

impl Orientation {
    /// Normalize to one of the four cardinal orientations.
    ///
    /// Flat or unknown readings normalize to portrait so that geometry
    /// decisions always have a usable value.
    pub fn normalized(self) -> Orientation {
        match self {
            Orientation::Portrait
            | Orientation::PortraitUpsideDown
            | Orientation::LandscapeLeft
            | Orientation::LandscapeRight => self,
            Orientation::FaceUp | Orientation::FaceDown | Orientation::Unknown => {
                Orientation::Portrait
            }
        }
    }

    /// Whether the normalized orientation is landscape.
    pub fn is_landscape(self) -> bool {
        matches!(
            self.normalized(),
            Orientation::LandscapeLeft | Orientation::LandscapeRight
        )
    }
}

/// A rectangle in normalized coordinates, origin and size in [0, 1]
/// relative to the full-screen frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Scale against full-screen pixel dimensions.
    ///
    /// No clamping is performed: a layout whose origin + size exceeds 1.0
    /// places the overlay partially or fully outside the visible frame.
    /// Validating the layout is the caller's responsibility.
    pub fn scaled_to(&self, width: u32, height: u32) -> PixelRect {
        PixelRect {
            x: self.x * width as f32,
            y: self.y * height as f32,
            width: self.width * width as f32,
            height: self.height * height as f32,
        }
    }
}

/// A rectangle in pixel coordinates of the full-screen frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// PiP placement preset for the given device orientation.
///
/// Portrait places a tall overlay near the top-left edge, landscape a wide
/// one; only the preset shape changes on rotation, never the caller's
/// locked recording geometry.
pub fn pip_preset(orientation: Orientation) -> NormalizedRect {
    if orientation.is_landscape() {
        NormalizedRect::new(0.03, 0.04, 0.25, 0.30)
    } else {
        NormalizedRect::new(0.04, 0.05, 0.30, 0.25)
    }
}
