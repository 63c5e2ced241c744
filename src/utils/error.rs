//! Error types and handling
//!
//! Common error types surfaced by the engine handle.

use crate::capture::CaptureError;
use crate::playback::PlaybackError;
use crate::store::{StoreError, TakeId};
use crate::timeline::TimelineError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-wide error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Take {take_id} was recorded but its preview is unavailable: {reason}")]
    PreviewUnavailable { take_id: TakeId, reason: String },

    #[error("Engine control task is no longer running")]
    ControlTaskClosed,
}

impl EngineError {
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        EngineError::InvalidState(message.into())
    }
}

impl From<CaptureError> for EngineError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::DeviceUnavailable(message) => EngineError::DeviceUnavailable(message),
            CaptureError::Storage(e) => EngineError::Storage(e.to_string()),
            CaptureError::Encode(e) => EngineError::Storage(e.to_string()),
            CaptureError::InvalidState(message) => EngineError::invalid_state(message),
        }
    }
}

impl From<PlaybackError> for EngineError {
    fn from(error: PlaybackError) -> Self {
        match error {
            PlaybackError::Decode(message) => EngineError::Decode(message),
            PlaybackError::DeviceUnavailable(message) => EngineError::DeviceUnavailable(message),
            PlaybackError::InvalidState(message) => EngineError::invalid_state(message),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        EngineError::Storage(error.to_string())
    }
}

impl From<TimelineError> for EngineError {
    fn from(error: TimelineError) -> Self {
        match error {
            TimelineError::Io(e) => EngineError::Storage(e.to_string()),
            other => EngineError::Decode(other.to_string()),
        }
    }
}

/// Error response for a UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&EngineError> for ErrorResponse {
    fn from(error: &EngineError) -> Self {
        let code = match error {
            EngineError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            EngineError::Decode(_) => "DECODE_ERROR",
            EngineError::Storage(_) => "STORAGE_ERROR",
            EngineError::InvalidState(_) => "INVALID_STATE",
            EngineError::InvalidConfig(_) => "INVALID_CONFIG",
            EngineError::PreviewUnavailable { .. } => "PREVIEW_UNAVAILABLE",
            EngineError::ControlTaskClosed => "CONTROL_TASK_CLOSED",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

impl From<EngineError> for ErrorResponse {
    fn from(error: EngineError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let busy: EngineError = CaptureError::DeviceUnavailable("mic in use".into()).into();
        assert_eq!(ErrorResponse::from(busy).code, "DEVICE_UNAVAILABLE");

        let missing: EngineError = StoreError::NotFound(TakeId::new("abc")).into();
        let response = ErrorResponse::from(&missing);
        assert_eq!(response.code, "STORAGE_ERROR");
        assert!(response.message.contains("abc"));

        let preview = EngineError::PreviewUnavailable {
            take_id: TakeId::new("abc"),
            reason: "not found".into(),
        };
        assert_eq!(ErrorResponse::from(preview).code, "PREVIEW_UNAVAILABLE");

        let config = EngineError::InvalidConfig("tickIntervalMs must be greater than zero".into());
        assert_eq!(ErrorResponse::from(config).code, "INVALID_CONFIG");
    }

    #[test]
    fn test_decode_errors_keep_their_kind() {
        let error: EngineError = PlaybackError::Decode("bad header".into()).into();
        assert_eq!(error, EngineError::Decode("bad header".into()));
    }
}
