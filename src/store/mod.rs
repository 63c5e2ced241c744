//! Take storage
//!
//! The engine only needs save/load/delete of raw take bytes keyed by an
//! opaque id. `DirectoryStore` is a file-backed implementation; template
//! databases plug in their own `RecordingStore`.

pub mod directory;

pub use directory::DirectoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque take identifier assigned by a store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TakeId(String);

impl TakeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TakeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One recorded attempt
#[derive(Debug, Clone)]
pub struct Take {
    /// Local id; the store assigns the persistent one on save
    pub id: TakeId,

    /// Encoded audio (mono WAV)
    pub audio_bytes: Vec<u8>,

    /// Measured length in seconds
    pub duration: f64,

    pub created_at: DateTime<Utc>,
}

impl Take {
    pub fn new(audio_bytes: Vec<u8>, duration: f64) -> Self {
        Self {
            id: TakeId::generate(),
            audio_bytes,
            duration,
            created_at: Utc::now(),
        }
    }
}

/// Store-related errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Take not found: {0}")]
    NotFound(TakeId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence contract for takes
#[async_trait]
pub trait RecordingStore: Send + Sync {
    /// Persist a take and return its id
    async fn save(&self, audio_bytes: Vec<u8>, duration: f64) -> StoreResult<TakeId>;

    async fn delete(&self, id: &TakeId) -> StoreResult<()>;

    /// Bytes and duration of a take, `None` if it does not exist
    async fn load(&self, id: &TakeId) -> StoreResult<Option<(Vec<u8>, f64)>>;
}
