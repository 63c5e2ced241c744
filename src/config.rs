//! Engine configuration
//!
//! Timing constants, volumes and file locations. Every field has a default so
//! a partial JSON file is enough.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Tick period shared by capture and playback
    pub tick_interval_ms: u64,

    /// Capacity of the live level ring buffer
    pub level_history: usize,

    /// Publish levels to observers every N ticks
    pub level_publish_every: u32,

    /// Slack before the end of a take that counts as end-of-stream (seconds)
    pub end_of_stream_epsilon: f64,

    /// Forward/backward skip distance (seconds)
    pub skip_seconds: f64,

    /// Accompaniment video volume while recording
    pub record_video_volume: f32,

    pub preview_audio_volume: f32,

    pub preview_video_volume: f32,

    /// Capture sample rate requested from the input device
    pub sample_rate: u32,

    /// Maximum video/mic drift tolerated before the video is re-seeked (seconds)
    pub video_drift_tolerance: f64,

    /// Where capture temp files go; system temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 30,
            level_history: 50,
            level_publish_every: 3,
            end_of_stream_epsilon: 0.1,
            skip_seconds: 10.0,
            record_video_volume: 0.0,
            preview_audio_volume: 1.0,
            preview_video_volume: 1.0,
            sample_rate: 44_100,
            video_drift_tolerance: 0.25,
            temp_dir: None,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file and validate it
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        config.validate()?;
        tracing::debug!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            bail!("tickIntervalMs must be greater than zero");
        }
        if self.level_history == 0 {
            bail!("levelHistory must be greater than zero");
        }
        if self.level_publish_every == 0 {
            bail!("levelPublishEvery must be greater than zero");
        }
        if self.sample_rate == 0 {
            bail!("sampleRate must be greater than zero");
        }
        for (name, volume) in [
            ("recordVideoVolume", self.record_video_volume),
            ("previewAudioVolume", self.preview_audio_volume),
            ("previewVideoVolume", self.preview_video_volume),
        ] {
            if !(0.0..=1.0).contains(&volume) {
                bail!("{} must be within 0.0..=1.0, got {}", name, volume);
            }
        }
        if self.end_of_stream_epsilon < 0.0 || self.skip_seconds < 0.0 {
            bail!("endOfStreamEpsilon and skipSeconds must not be negative");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "skipSeconds": 5.0, "previewAudioVolume": 0.5 }"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.skip_seconds, 5.0);
        assert_eq!(config.preview_audio_volume, 0.5);
        assert_eq!(config.tick_interval_ms, 30);
        assert_eq!(config.level_history, 50);
    }

    #[test]
    fn test_rejects_out_of_range_volume() {
        let config = EngineConfig {
            record_video_volume: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_tick() {
        let config = EngineConfig {
            tick_interval_ms: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
