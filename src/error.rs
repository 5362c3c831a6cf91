//! Error types and handling
//!
//! Common error types used across the crate.

use crate::capture::types::CaptureError;
use crate::compositor::CompositorError;
use crate::session::SessionError;
use crate::writer::WriterError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum CamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dual capture is not supported on this device")]
    Unsupported,

    #[error("dual mode is already enabled")]
    AlreadyEnabled,

    #[error("dual mode is not enabled")]
    NotEnabled,

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("compositor error: {0}")]
    Compositor(#[from] CompositorError),

    #[error("writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("encoding error: {0}")]
    Encode(String),

    #[error("metadata error: {0}")]
    Metadata(String),
}

/// Error shape reported over the event channel and to host callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&CamError> for ErrorResponse {
    fn from(error: &CamError) -> Self {
        let code = match error {
            CamError::Io(_) => "IO_ERROR",
            CamError::Unsupported => "UNSUPPORTED",
            CamError::AlreadyEnabled => "ALREADY_ENABLED",
            CamError::NotEnabled => "NOT_ENABLED",
            CamError::Capture(_) => "CAPTURE_ERROR",
            CamError::Session(_) => "SESSION_ERROR",
            CamError::Compositor(_) => "COMPOSITOR_ERROR",
            CamError::Writer(_) => "WRITER_ERROR",
            CamError::Encode(_) => "ENCODE_ERROR",
            CamError::Metadata(_) => "METADATA_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

impl From<CamError> for ErrorResponse {
    fn from(error: CamError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using CamError
pub type CamResult<T> = Result<T, CamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_carries_code_and_message() {
        let err = CamError::Unsupported;
        let resp = ErrorResponse::from(err);
        assert_eq!(resp.code, "UNSUPPORTED");
        assert!(!resp.message.is_empty());
    }

    #[test]
    fn test_nested_errors_convert() {
        let err = CamError::from(WriterError::FfmpegMissing);
        let resp = ErrorResponse::from(&err);
        assert_eq!(resp.code, "WRITER_ERROR");
        assert!(resp.message.contains("FFmpeg"));
    }
}
