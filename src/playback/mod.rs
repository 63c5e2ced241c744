//! Take and video playback
//!
//! This module provides the playback side of the engine:
//! - `AudioPlayer` decodes and plays a take; `SpeakerPlayer` is the cpal one
//! - `VideoSource` prepares accompaniment video off the control task
//! - `PlaybackSession` keeps one clock for audio, video and the timeline

pub mod audio;
pub mod clock;
pub mod session;
pub mod speaker;
pub mod video;
pub mod waveform;

pub use audio::{decode_wav, AudioPlayer, DecodedAudioPlayer};
pub use clock::PlayClock;
pub use session::{
    ClockSource, PlaybackPhase, PlaybackSession, PlaybackSettings, PlaybackState, PlaybackTick,
    VideoNotice,
};
pub use speaker::SpeakerPlayer;
pub use video::{
    parse_probe_output, ClockedVideo, FfprobeVideoSource, VideoDecoder, VideoMetadata, VideoRef,
    VideoSource,
};
pub use waveform::compute_peaks;

use crate::capture::DeviceError;
use thiserror::Error;

/// Playback errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Playback device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Invalid playback state: {0}")]
    InvalidState(&'static str),
}

impl From<hound::Error> for PlaybackError {
    fn from(error: hound::Error) -> Self {
        PlaybackError::Decode(error.to_string())
    }
}

impl From<DeviceError> for PlaybackError {
    fn from(error: DeviceError) -> Self {
        PlaybackError::DeviceUnavailable(error.to_string())
    }
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;
