//! Capture system module
//!
//! Camera and microphone source abstractions plus the concrete nokhwa/cpal
//! backends:
//! - `types`: frames, audio chunks, and the tagged delivery channel
//! - `source`: `VideoSource`/`AudioSource` traits and external collaborators
//! - `camera`: nokhwa-backed camera source
//! - `audio`: cpal-backed microphone source

pub mod audio;
pub mod camera;
pub mod source;
pub mod types;

pub use source::{AudioSource, CameraProvider, LocationProvider, PreviewPlacement, VideoSource};
pub use types::{
    AudioChunk, CameraFacing, CameraInfo, CaptureError, FrameFormat, FrameSink, GeoFix, PixelData,
    PixelFormat, SinkKind, SourceConfig, SourceEvent, VideoFrame,
};
