//! Directory-backed take store
//!
//! Each take is two files in the store directory:
//! - `<id>.wav`: the audio bytes as captured
//! - `<id>.json`: metadata (duration, creation time)
//!
//! Ids are the UUIDs `save` hands out. Anything else never maps to a path.

use super::{RecordingStore, StoreError, StoreResult, TakeId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeMeta {
    pub id: TakeId,
    pub duration: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        if !root.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{:?} is not a directory",
                root
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Audio and metadata paths, or `None` for an id this store never issued
    fn take_files(&self, id: &TakeId) -> Option<(PathBuf, PathBuf)> {
        let uuid = Uuid::parse_str(id.as_str()).ok()?;
        let stem = uuid.hyphenated().to_string();
        Some((
            self.root.join(format!("{}.wav", stem)),
            self.root.join(format!("{}.json", stem)),
        ))
    }

    /// Metadata of every take in the store, oldest first
    pub async fn list(&self) -> StoreResult<Vec<TakeMeta>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut takes = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str::<TakeMeta>(&content) {
                Ok(meta) => takes.push(meta),
                Err(e) => tracing::warn!("Skipping unreadable take metadata {:?}: {}", path, e),
            }
        }

        takes.sort_by_key(|m| m.created_at);
        Ok(takes)
    }
}

#[async_trait]
impl RecordingStore for DirectoryStore {
    async fn save(&self, audio_bytes: Vec<u8>, duration: f64) -> StoreResult<TakeId> {
        let id = TakeId::generate();
        let (audio_path, meta_path) = self.take_files(&id).ok_or_else(|| {
            StoreError::Unavailable(format!("generated id {} is not a UUID", id))
        })?;
        let meta = TakeMeta {
            id: id.clone(),
            duration,
            created_at: Utc::now(),
        };

        fs::write(&audio_path, &audio_bytes).await?;
        // Metadata last: a take without metadata is invisible to load/list
        fs::write(&meta_path, serde_json::to_string_pretty(&meta)?).await?;

        tracing::debug!(
            "Saved take {} ({:.2}s, {} bytes) to {:?}",
            id,
            duration,
            audio_bytes.len(),
            self.root
        );
        Ok(id)
    }

    async fn delete(&self, id: &TakeId) -> StoreResult<()> {
        let Some((audio_path, meta_path)) = self.take_files(id) else {
            tracing::warn!("Refusing to delete take with foreign id {:?}", id.as_str());
            return Err(StoreError::NotFound(id.clone()));
        };
        if !meta_path.exists() {
            return Err(StoreError::NotFound(id.clone()));
        }

        fs::remove_file(&meta_path).await?;
        if audio_path.exists() {
            fs::remove_file(&audio_path).await?;
        }

        tracing::debug!("Deleted take {}", id);
        Ok(())
    }

    async fn load(&self, id: &TakeId) -> StoreResult<Option<(Vec<u8>, f64)>> {
        let Some((audio_path, meta_path)) = self.take_files(id) else {
            tracing::warn!("Ignoring load of take with foreign id {:?}", id.as_str());
            return Ok(None);
        };
        if !meta_path.exists() {
            return Ok(None);
        }

        let meta: TakeMeta = serde_json::from_str(&fs::read_to_string(&meta_path).await?)?;
        if !audio_path.exists() {
            tracing::warn!("Take {} has metadata but no audio", id);
            return Ok(None);
        }

        let bytes = fs::read(&audio_path).await?;
        Ok(Some((bytes, meta.duration)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("takes")).unwrap();

        let id = store.save(vec![7u8; 1_024], 3.25).await.unwrap();
        let (bytes, duration) = store.load(&id).await.unwrap().unwrap();

        assert_eq!(bytes.len(), 1_024);
        assert_eq!(duration, 3.25);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        assert!(store.load(&TakeId::new("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_both_files() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        let id = store.save(vec![1, 2, 3], 1.0).await.unwrap();

        store.delete(&id).await.unwrap();

        assert!(store.load(&id).await.unwrap().is_none());
        let (audio_path, meta_path) = store.take_files(&id).unwrap();
        assert!(!audio_path.exists());
        assert!(!meta_path.exists());
        assert!(matches!(
            store.delete(&id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ids_outside_the_store_are_never_touched() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("takes")).unwrap();
        let victim = dir.path().join("victim");
        std::fs::write(victim.with_extension("wav"), b"keep me").unwrap();
        let meta = r#"{"id":"victim","duration":1.0,"createdAt":"2024-01-01T00:00:00Z"}"#;
        std::fs::write(victim.with_extension("json"), meta).unwrap();

        let escape = TakeId::new("../victim");
        assert!(store.load(&escape).await.unwrap().is_none());
        assert!(matches!(
            store.delete(&escape).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(victim.with_extension("wav").exists());
        assert!(victim.with_extension("json").exists());
    }

    #[test]
    fn test_open_rejects_file_path() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            DirectoryStore::open(&file),
            Err(StoreError::Unavailable(_))
        ));
    }
}
