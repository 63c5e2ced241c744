//! Microphone capture
//!
//! This module provides the capture side of the engine:
//! - `AudioSession` arbitrates the exclusive audio device
//! - `InputDevice` sources samples (cpal microphone or signal generator)
//! - `CaptureSession` writes one take and meters it live

pub mod device;
pub mod input;
pub mod meter;
pub mod microphone;
pub mod session;
pub mod writer;

pub use device::{AudioSession, DeviceError, DeviceLease, DeviceRole, SessionMode};
pub use input::{AudioDeviceInfo, InputDevice, InputFormat, SignalGenerator};
pub use microphone::{input_devices, Microphone};
pub use session::{CapturePhase, CaptureSession, CaptureSettings, CaptureState, CaptureTick};

use thiserror::Error;

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] hound::Error),

    #[error("Invalid capture state: {0}")]
    InvalidState(&'static str),
}

impl From<DeviceError> for CaptureError {
    fn from(error: DeviceError) -> Self {
        CaptureError::DeviceUnavailable(error.to_string())
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;
