//! Fakes shared by the session and orchestrator tests

use crate::playback::{
    ClockedVideo, PlaybackError, PlaybackResult, VideoDecoder, VideoMetadata, VideoRef, VideoSource,
};
use crate::store::{RecordingStore, StoreError, StoreResult, TakeId};
use crate::timeline::{ImageRef, TimelineEvent, TimelineIndex, TimelineProvider};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// 10s script: "Hello" at 0s, an image with no caption at 3s
pub fn script_timeline() -> Arc<dyn TimelineProvider> {
    Arc::new(TimelineIndex::script(
        vec![
            TimelineEvent::new("hello", 0.0, "Hello"),
            TimelineEvent::new("poster", 3.0, "").with_image(ImageRef::new("poster.png")),
        ],
        10.0,
    ))
}

/// Video source whose prepares block until the test opens the gate
#[derive(Clone)]
pub struct GatedVideoSource {
    gate: Arc<Semaphore>,
    prepared: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl GatedVideoSource {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            prepared: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Already-open source
    pub fn ready() -> Self {
        let source = Self::new();
        source.open();
        source
    }

    pub fn open(&self) {
        self.gate.add_permits(1_000);
    }

    /// Every later prepare fails with a decode error
    pub fn fail_prepares(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Number of prepare calls made
    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSource for GatedVideoSource {
    async fn prepare(&self, _reference: &VideoRef) -> PlaybackResult<Box<dyn VideoDecoder>> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlaybackError::Decode("unsupported container".to_string()));
        }
        Ok(Box::new(ClockedVideo::new(VideoMetadata {
            width: 1280,
            height: 720,
            fps: 30.0,
            duration: 30.0,
            codec: "h264".to_string(),
        })))
    }
}

/// In-memory store with switchable failures
#[derive(Default)]
pub struct MemoryStore {
    takes: Mutex<HashMap<TakeId, (Vec<u8>, f64)>>,
    failing_saves: AtomicUsize,
    failing_deletes: AtomicUsize,
    next_id: Mutex<Option<TakeId>>,
    load_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` saves
    pub fn fail_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` deletes
    pub fn fail_deletes(&self, count: usize) {
        self.failing_deletes.store(count, Ordering::SeqCst);
    }

    /// Use `id` for the next save instead of a generated one
    pub fn assign_next_id(&self, id: &str) {
        *self.next_id.lock() = Some(TakeId::new(id));
    }

    /// Make every later load take `delay`
    pub fn delay_loads(&self, delay: Duration) {
        *self.load_delay.lock() = Some(delay);
    }

    pub fn contains(&self, id: &TakeId) -> bool {
        self.takes.lock().contains_key(id)
    }

    pub fn insert(&self, id: &str, audio_bytes: Vec<u8>, duration: f64) {
        self.takes
            .lock()
            .insert(TakeId::new(id), (audio_bytes, duration));
    }

    fn consume_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RecordingStore for MemoryStore {
    async fn save(&self, audio_bytes: Vec<u8>, duration: f64) -> StoreResult<TakeId> {
        if Self::consume_failure(&self.failing_saves) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        let id = self.next_id.lock().take().unwrap_or_else(TakeId::generate);
        self.takes
            .lock()
            .insert(id.clone(), (audio_bytes, duration));
        Ok(id)
    }

    async fn delete(&self, id: &TakeId) -> StoreResult<()> {
        if Self::consume_failure(&self.failing_deletes) {
            return Err(StoreError::Unavailable("network down".to_string()));
        }
        match self.takes.lock().remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    async fn load(&self, id: &TakeId) -> StoreResult<Option<(Vec<u8>, f64)>> {
        let delay = *self.load_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.takes.lock().get(id).cloned())
    }
}
