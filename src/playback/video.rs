//! Accompaniment video
//!
//! Frames are rendered by the UI layer; the engine only needs a decoder it
//! can start, pause and seek in lockstep with the take, plus a readiness
//! signal. `FfprobeVideoSource` probes local files with ffprobe and hands
//! out clock-driven decoders.

use super::clock::PlayClock;
use super::{PlaybackError, PlaybackResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::process::Command;

/// Opaque reference to a video (local path or URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoRef(String);

impl VideoRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces decoders that are buffered enough to play without stalling
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn prepare(&self, reference: &VideoRef) -> PlaybackResult<Box<dyn VideoDecoder>>;
}

/// A prepared video stream
pub trait VideoDecoder: Send {
    fn play(&mut self);

    fn pause(&mut self);

    fn stop(&mut self);

    fn seek(&mut self, seconds: f64);

    fn set_volume(&mut self, volume: f32);

    /// Current position in seconds
    fn position(&self) -> f64;
}

/// Video metadata returned from ffprobe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration: f64,
    pub codec: String,
}

/// Parse a frame rate given as "30/1" or "29.97"
fn parse_frame_rate(rate: &str) -> f64 {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => rate.parse().unwrap_or(0.0),
    }
}

/// Extract metadata from `ffprobe -print_format json -show_streams -show_format`
pub fn parse_probe_output(json: &str) -> PlaybackResult<VideoMetadata> {
    let json: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| PlaybackError::Decode(format!("Failed to parse ffprobe output: {}", e)))?;

    let stream = json
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|s| s.first())
        .ok_or_else(|| PlaybackError::Decode("No video stream found".to_string()))?;

    let dimension = |key: &str| stream.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    let duration = json
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoMetadata {
        width: dimension("width"),
        height: dimension("height"),
        fps: stream
            .get("r_frame_rate")
            .and_then(|v| v.as_str())
            .map(parse_frame_rate)
            .unwrap_or(0.0),
        duration,
        codec: stream
            .get("codec_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
    })
}

/// Probes videos with the ffprobe binary
#[derive(Debug, Clone)]
pub struct FfprobeVideoSource {
    ffprobe: PathBuf,
}

impl FfprobeVideoSource {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }

    pub async fn probe(&self, reference: &VideoRef) -> PlaybackResult<VideoMetadata> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
                "-select_streams",
                "v:0",
                reference.as_str(),
            ])
            .output()
            .await
            .map_err(|e| PlaybackError::Decode(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(PlaybackError::Decode(format!(
                "ffprobe failed for {}: {}",
                reference,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Default for FfprobeVideoSource {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl VideoSource for FfprobeVideoSource {
    async fn prepare(&self, reference: &VideoRef) -> PlaybackResult<Box<dyn VideoDecoder>> {
        let metadata = self.probe(reference).await?;
        tracing::info!(
            "Video ready: {} ({}x{} @ {:.2}fps, {:.2}s, {})",
            reference,
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata.duration,
            metadata.codec
        );
        Ok(Box::new(ClockedVideo::new(metadata)))
    }
}

/// Decoder whose position is driven by the engine clock
#[derive(Debug)]
pub struct ClockedVideo {
    metadata: VideoMetadata,
    clock: PlayClock,
    volume: f32,
}

impl ClockedVideo {
    pub fn new(metadata: VideoMetadata) -> Self {
        Self {
            clock: PlayClock::new(metadata.duration),
            metadata,
            volume: 1.0,
        }
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl VideoDecoder for ClockedVideo {
    fn play(&mut self) {
        self.clock.start();
    }

    fn pause(&mut self) {
        self.clock.pause();
    }

    fn stop(&mut self) {
        self.clock.reset();
    }

    fn seek(&mut self, seconds: f64) {
        self.clock.seek(seconds);
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn position(&self) -> f64 {
        self.clock.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE: &str = r#"{
        "streams": [{
            "codec_name": "h264",
            "width": 1280,
            "height": 720,
            "r_frame_rate": "30000/1001"
        }],
        "format": { "duration": "12.480000" }
    }"#;

    #[test]
    fn test_parse_probe_output() {
        let meta = parse_probe_output(PROBE).unwrap();
        assert_eq!(meta.width, 1280);
        assert_eq!(meta.height, 720);
        assert_eq!(meta.codec, "h264");
        assert!((meta.fps - 29.97).abs() < 0.01);
        assert!((meta.duration - 12.48).abs() < 1e-9);
    }

    #[test]
    fn test_probe_without_streams_is_decode_error() {
        assert!(matches!(
            parse_probe_output(r#"{ "streams": [] }"#),
            Err(PlaybackError::Decode(_))
        ));
    }

    #[test]
    fn test_frame_rate_formats() {
        assert_eq!(parse_frame_rate("25/1"), 25.0);
        assert_eq!(parse_frame_rate("24"), 24.0);
        assert_eq!(parse_frame_rate("30/0"), 0.0);
    }

    #[tokio::test]
    async fn test_missing_ffprobe_binary_is_decode_error() {
        let source = FfprobeVideoSource::new("/nonexistent/ffprobe");
        let result = source.prepare(&VideoRef::new("clip.mp4")).await;
        assert!(matches!(result, Err(PlaybackError::Decode(_))));
    }
}
