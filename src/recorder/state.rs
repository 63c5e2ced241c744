//! Engine state
//!
//! Defines the rehearsal state machine and the snapshots observers receive.

use crate::store::TakeId;
use crate::timeline::DisplayPayload;
use crate::utils::ErrorResponse;
use serde::{Deserialize, Serialize};

/// Where the engine is in the record/preview cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Nothing recorded or loaded yet
    Uninitialized,
    /// Capturing a take against the timeline
    Recording,
    /// Take captured; persisting it and loading it back
    SavingTake,
    /// Save failed; the take is held for another stop
    SaveFailed,
    /// Reading an earlier take back from the store
    LoadingTake,
    /// Saved take loaded for playback
    Previewing,
    /// Preview paused under a drag
    ScrubbingPreview,
    /// Saved take deleted and sessions torn down
    Dismissed,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Uninitialized
    }
}

/// Snapshot published after every change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub phase: Phase,
    pub is_recording: bool,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub active_display: Option<DisplayPayload>,
    /// Recent input levels, linear 0.0-1.0
    pub levels: Vec<f32>,
    pub take_id: Option<TakeId>,
    pub has_video: bool,
    pub is_video_ready: bool,
    pub error: Option<ErrorResponse>,
}

/// Lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    RecordingStarted { max_duration: f64 },
    /// Capture stopped, by the user or at the end of the timeline
    RecordingStopped { duration: f64 },
    TakeSaved { take_id: TakeId },
    SaveFailed { message: String },
    PreviewReady { take_id: TakeId, duration: f64 },
    PlaybackFinished,
    Dismissed,
    Error(ErrorResponse),
}
