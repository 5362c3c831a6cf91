//! Media writing module
//!
//! Encodes the composited stream plus optional microphone audio into an
//! MP4 file. The [`MediaWriter`] trait keeps the encoder swappable;
//! `stream` holds the FFmpeg-backed implementation.

pub mod stream;

use crate::capture::types::{AudioChunk, VideoFrame};
use crate::geometry::Orientation;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("a recording is already in progress")]
    AlreadyWriting,

    #[error("writer has not been started")]
    NotStarted,

    #[error("FFmpeg not found. Please install FFmpeg and ensure it is in PATH")]
    FfmpegMissing,

    #[error("failed to spawn encoder: {0}")]
    Spawn(String),

    #[error("failed to finalize recording: {0}")]
    Finalize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Files produced by a finished recording.
#[derive(Debug, Clone)]
pub struct RecordingArtifacts {
    pub video_path: PathBuf,
    /// Still extracted near the one-second mark; `None` when extraction
    /// failed, which never fails the recording itself.
    pub thumbnail_path: Option<PathBuf>,
}

/// Configuration for one recording.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub output_dir: PathBuf,
    pub audio_enabled: bool,
    /// Orientation locked at recording start; fixes the encoded dimensions.
    pub orientation_hint: Orientation,
    pub fps: u32,
}

/// Encoded output dimensions for the locked orientation.
///
/// Portrait encodes 1080x1920, landscape 1920x1080. Flat and unknown
/// orientations fall back to portrait.
pub fn encoding_dimensions(orientation: Orientation) -> (u32, u32) {
    if orientation.is_landscape() {
        (1920, 1080)
    } else {
        (1080, 1920)
    }
}

/// Sink for composited frames and microphone audio during one recording.
///
/// `append_*` are the per-frame hot path: they hand data to the encoder
/// without blocking and drop when the encoder falls behind. `finish`
/// consumes the writer, flushes the encoder, and muxes the final file.
pub trait MediaWriter: Send {
    /// Queue a composited frame. `pts` is relative to the source stream;
    /// the writer anchors its timeline at the first frame it accepts.
    fn append_video(&self, frame: &VideoFrame, pts: Duration);

    fn append_audio(&self, chunk: &AudioChunk);

    fn finish(self: Box<Self>) -> Result<RecordingArtifacts, WriterError>;
}

/// Constructs a writer per recording.
pub trait WriterFactory: Send + Sync {
    fn create(&self, options: &WriterOptions) -> Result<Box<dyn MediaWriter>, WriterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_dimensions_follow_orientation() {
        assert_eq!(encoding_dimensions(Orientation::Portrait), (1080, 1920));
        assert_eq!(
            encoding_dimensions(Orientation::PortraitUpsideDown),
            (1080, 1920)
        );
        assert_eq!(
            encoding_dimensions(Orientation::LandscapeLeft),
            (1920, 1080)
        );
        assert_eq!(
            encoding_dimensions(Orientation::LandscapeRight),
            (1920, 1080)
        );
    }

    #[test]
    fn test_flat_orientation_encodes_portrait() {
        assert_eq!(encoding_dimensions(Orientation::FaceUp), (1080, 1920));
        assert_eq!(encoding_dimensions(Orientation::Unknown), (1080, 1920));
    }
}
