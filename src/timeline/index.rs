//! Time-ordered cue index
//!
//! Answers "which cue is on screen at time T" for both timeline kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference to an image blob owned by the template store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A scripted point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    /// Identifier assigned by the template store
    pub id: String,

    /// Seconds from the start of the timeline
    pub timestamp: f64,

    /// Line to display (may be empty)
    #[serde(default)]
    pub caption: String,

    /// Image shown from this cue on
    #[serde(default)]
    pub image: Option<ImageRef>,
}

impl TimelineEvent {
    pub fn new(id: impl Into<String>, timestamp: f64, caption: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            caption: caption.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }
}

/// What the UI should show for a point on the timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayPayload {
    /// Timestamp of the cue this payload was derived from
    pub timestamp: f64,

    pub caption: String,

    /// Effective image after carry-forward
    pub image: Option<ImageRef>,

    /// Whether `image` belongs to the cue itself rather than an earlier one
    pub own_image: bool,
}

/// Which flavour of template the cues come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineKind {
    /// Text and still images; images carry forward until replaced
    Script,
    /// Text over a video; frames come from the video itself
    Video,
}

#[derive(Debug, Clone, Default)]
struct Cues {
    events: Vec<TimelineEvent>,
    total_duration: f64,
}

impl Cues {
    fn new(mut events: Vec<TimelineEvent>, total_duration: f64) -> Self {
        // Stable sort keeps insertion order among equal timestamps, so the
        // upper-bound lookup below resolves duplicates to the last inserted.
        events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Self {
            events,
            total_duration: total_duration.max(0.0),
        }
    }

    /// Index of the event with the greatest timestamp <= `t`
    fn position_at(&self, t: f64) -> Option<usize> {
        let upper = self.events.partition_point(|e| e.timestamp <= t);
        upper.checked_sub(1)
    }

    /// Nearest event at or before `index` that carries an image
    fn last_image_at(&self, index: usize) -> Option<&ImageRef> {
        self.events[..=index]
            .iter()
            .rev()
            .find_map(|e| e.image.as_ref())
    }
}

/// Immutable, time-ordered view over cue events
///
/// Duplicate timestamps are a caller precondition violation; when they
/// happen anyway the event inserted last wins.
#[derive(Debug, Clone)]
pub enum TimelineIndex {
    Script(CueSet),
    Video(CueSet),
}

/// Sorted cue storage shared by both timeline kinds
#[derive(Debug, Clone, Default)]
pub struct CueSet(Cues);

impl TimelineIndex {
    pub fn new(kind: TimelineKind, events: Vec<TimelineEvent>, total_duration: f64) -> Self {
        let cues = CueSet(Cues::new(events, total_duration));
        match kind {
            TimelineKind::Script => Self::Script(cues),
            TimelineKind::Video => Self::Video(cues),
        }
    }

    pub fn script(events: Vec<TimelineEvent>, total_duration: f64) -> Self {
        Self::new(TimelineKind::Script, events, total_duration)
    }

    pub fn video(events: Vec<TimelineEvent>, total_duration: f64) -> Self {
        Self::new(TimelineKind::Video, events, total_duration)
    }

    pub fn kind(&self) -> TimelineKind {
        match self {
            Self::Script(_) => TimelineKind::Script,
            Self::Video(_) => TimelineKind::Video,
        }
    }

    fn cues(&self) -> &Cues {
        match self {
            Self::Script(c) | Self::Video(c) => &c.0,
        }
    }

    fn carries_images(&self) -> bool {
        matches!(self, Self::Script(_))
    }

    pub fn total_duration(&self) -> f64 {
        self.cues().total_duration
    }

    pub fn len(&self) -> usize {
        self.cues().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues().events.is_empty()
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.cues().events
    }

    /// Payload of the cue active at `timestamp`, or `None` before the first cue
    pub fn event_at(&self, timestamp: f64) -> Option<DisplayPayload> {
        let index = self.cues().position_at(timestamp)?;
        Some(self.payload_for(index))
    }

    fn payload_for(&self, index: usize) -> DisplayPayload {
        let cues = self.cues();
        let event = &cues.events[index];
        let (image, own_image) = if self.carries_images() {
            match &event.image {
                Some(own) => (Some(own.clone()), true),
                None => (cues.last_image_at(index).cloned(), false),
            }
        } else {
            (None, false)
        };

        DisplayPayload {
            timestamp: event.timestamp,
            caption: event.caption.clone(),
            image,
            own_image,
        }
    }

    /// One payload per cue in timestamp order
    ///
    /// The iterator is recomputed from the index on every call, so it can be
    /// restarted at will.
    pub fn payloads(&self) -> Payloads<'_> {
        Payloads {
            index: self,
            position: 0,
            carried: None,
        }
    }
}

/// Iterator returned by [`TimelineIndex::payloads`]
pub struct Payloads<'a> {
    index: &'a TimelineIndex,
    position: usize,
    carried: Option<ImageRef>,
}

impl Iterator for Payloads<'_> {
    type Item = DisplayPayload;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.index.events().get(self.position)?;
        self.position += 1;

        if !self.index.carries_images() {
            return Some(DisplayPayload {
                timestamp: event.timestamp,
                caption: event.caption.clone(),
                image: None,
                own_image: false,
            });
        }

        // Walk forward carrying the last image instead of searching backwards
        // for every element.
        let own_image = event.image.is_some();
        if let Some(image) = &event.image {
            self.carried = Some(image.clone());
        }
        Some(DisplayPayload {
            timestamp: event.timestamp,
            caption: event.caption.clone(),
            image: self.carried.clone(),
            own_image,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.index.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Payloads<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_script() -> TimelineIndex {
        TimelineIndex::script(
            vec![
                TimelineEvent::new("c", 5.0, "third"),
                TimelineEvent::new("a", 0.0, "first"),
                TimelineEvent::new("b", 2.0, "second").with_image(ImageRef::new("img-b")),
            ],
            10.0,
        )
    }

    #[test]
    fn test_event_at_picks_greatest_timestamp_not_after() {
        let index = sample_script();

        assert_eq!(index.event_at(0.0).unwrap().caption, "first");
        assert_eq!(index.event_at(1.99).unwrap().caption, "first");
        assert_eq!(index.event_at(2.0).unwrap().caption, "second");
        assert_eq!(index.event_at(4.5).unwrap().caption, "second");
        assert_eq!(index.event_at(100.0).unwrap().caption, "third");
    }

    #[test]
    fn test_event_at_before_first_cue_is_none() {
        let index = TimelineIndex::script(vec![TimelineEvent::new("a", 1.5, "late")], 5.0);
        assert!(index.event_at(1.0).is_none());
        assert!(index.event_at(-3.0).is_none());
        assert!(index.event_at(1.5).is_some());
    }

    #[test]
    fn test_empty_timeline_has_no_payloads() {
        let index = TimelineIndex::script(Vec::new(), 3.0);
        assert!(index.is_empty());
        assert!(index.event_at(1.0).is_none());
        assert_eq!(index.payloads().count(), 0);
        assert_eq!(index.total_duration(), 3.0);
    }

    #[test]
    fn test_image_carries_forward_in_script_timelines() {
        let index = sample_script();

        let at_six = index.event_at(6.0).unwrap();
        assert_eq!(at_six.caption, "third");
        assert_eq!(at_six.image, Some(ImageRef::new("img-b")));
        assert!(!at_six.own_image);

        let at_two = index.event_at(2.0).unwrap();
        assert!(at_two.own_image);

        assert_eq!(index.event_at(0.5).unwrap().image, None);
    }

    #[test]
    fn test_video_timelines_never_carry_images() {
        let index = TimelineIndex::video(
            vec![
                TimelineEvent::new("a", 0.0, "intro").with_image(ImageRef::new("frame")),
                TimelineEvent::new("b", 3.0, "line"),
            ],
            8.0,
        );

        assert_eq!(index.kind(), TimelineKind::Video);
        assert_eq!(index.event_at(0.0).unwrap().image, None);
        assert_eq!(index.event_at(4.0).unwrap().image, None);
        assert!(index.payloads().all(|p| p.image.is_none()));
    }

    #[test]
    fn test_duplicate_timestamps_resolve_to_last_inserted() {
        let index = TimelineIndex::script(
            vec![
                TimelineEvent::new("a", 1.0, "older"),
                TimelineEvent::new("b", 1.0, "newer"),
            ],
            2.0,
        );
        assert_eq!(index.event_at(1.0).unwrap().caption, "newer");
    }

    #[test]
    fn test_payloads_match_point_lookups() {
        let index = sample_script();
        let listed: Vec<_> = index.payloads().collect();

        assert_eq!(listed.len(), 3);
        for payload in &listed {
            assert_eq!(index.event_at(payload.timestamp).as_ref(), Some(payload));
        }

        // Restartable
        assert_eq!(index.payloads().collect::<Vec<_>>(), listed);
    }
}
