//! Cue timeline
//!
//! - `TimelineIndex` answers which cue is active at a given time
//! - `TimelineProvider` is the narrow contract the sessions consume
//! - `TimelineDocument` loads exported template timelines

pub mod document;
pub mod index;

pub use document::TimelineDocument;
pub use index::{DisplayPayload, ImageRef, TimelineEvent, TimelineIndex, TimelineKind};

use thiserror::Error;

/// Timeline loading errors
#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid timeline duration: {0}")]
    InvalidDuration(f64),

    #[error("Invalid event '{id}' at {time}s")]
    InvalidEvent { id: String, time: f64 },

    #[error("Event references unknown image: {0}")]
    UnknownImage(String),
}

pub type TimelineResult<T> = Result<T, TimelineError>;

/// Read-only timeline view consumed by the capture/playback machinery
pub trait TimelineProvider: Send + Sync {
    /// Length of the script in seconds; also the maximum take length
    fn total_duration(&self) -> f64;

    /// Payload active at `timestamp`
    fn event_at(&self, timestamp: f64) -> Option<DisplayPayload>;

    /// All payloads in timestamp order
    fn all_display_payloads(&self) -> Box<dyn Iterator<Item = DisplayPayload> + '_>;
}

impl TimelineProvider for TimelineIndex {
    fn total_duration(&self) -> f64 {
        TimelineIndex::total_duration(self)
    }

    fn event_at(&self, timestamp: f64) -> Option<DisplayPayload> {
        TimelineIndex::event_at(self, timestamp)
    }

    fn all_display_payloads(&self) -> Box<dyn Iterator<Item = DisplayPayload> + '_> {
        Box::new(self.payloads())
    }
}
