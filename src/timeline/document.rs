//! Timeline document format
//!
//! The JSON shape templates are exported in:
//!
//! ```json
//! { "duration": 12.5,
//!   "images": ["cue-1.jpg"],
//!   "events": [{ "time": 0.0, "id": "a", "text": "Hello", "image": "cue-1.jpg" }] }
//! ```

use super::index::{ImageRef, TimelineEvent, TimelineIndex, TimelineKind};
use super::{TimelineError, TimelineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineDocument {
    /// Total timeline length in seconds
    pub duration: f64,

    /// Image names referenced by events
    #[serde(default)]
    pub images: Vec<String>,

    #[serde(default)]
    pub events: Vec<DocumentEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEvent {
    pub time: f64,

    #[serde(default)]
    pub id: String,

    /// Omitted when the cue has no text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl TimelineDocument {
    pub fn from_json(content: &str) -> TimelineResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn read(path: &Path) -> TimelineResult<Self> {
        let content = fs::read_to_string(path)?;
        let document = Self::from_json(&content)?;
        tracing::debug!(
            "Loaded timeline with {} events from {:?}",
            document.events.len(),
            path
        );
        Ok(document)
    }

    /// Check times and image references
    pub fn validate(&self) -> TimelineResult<()> {
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(TimelineError::InvalidDuration(self.duration));
        }

        let known: HashSet<&str> = self.images.iter().map(String::as_str).collect();
        for event in &self.events {
            if !event.time.is_finite() || event.time < 0.0 {
                return Err(TimelineError::InvalidEvent {
                    id: event.id.clone(),
                    time: event.time,
                });
            }
            if let Some(image) = &event.image {
                if !known.contains(image.as_str()) {
                    return Err(TimelineError::UnknownImage(image.clone()));
                }
            }
        }
        Ok(())
    }

    /// Build an index of the given kind
    pub fn into_index(self, kind: TimelineKind) -> TimelineResult<TimelineIndex> {
        self.validate()?;

        let events = self
            .events
            .into_iter()
            .map(|e| TimelineEvent {
                id: e.id,
                timestamp: e.time,
                caption: e.text.unwrap_or_default(),
                image: e.image.map(ImageRef::new),
            })
            .collect();

        Ok(TimelineIndex::new(kind, events, self.duration))
    }
}

impl From<&TimelineIndex> for TimelineDocument {
    fn from(index: &TimelineIndex) -> Self {
        let mut images = Vec::new();
        let events = index
            .events()
            .iter()
            .map(|e| {
                if let Some(image) = &e.image {
                    images.push(image.as_str().to_string());
                }
                DocumentEvent {
                    time: e.timestamp,
                    id: e.id.clone(),
                    text: (!e.caption.is_empty()).then(|| e.caption.clone()),
                    image: e.image.as_ref().map(|i| i.as_str().to_string()),
                }
            })
            .collect();

        Self {
            duration: index.total_duration(),
            images,
            events,
        }
    }
}
