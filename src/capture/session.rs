//! Capture session
//!
//! One session records one take: `Idle -> Recording -> Stopped`. The owner
//! drives it by calling `tick()` on every timeline tick.

use super::device::{AudioSession, DeviceLease, DeviceRole, SessionMode};
use super::input::InputDevice;
use super::meter::{db_to_linear, rms_db, LevelHistory};
use super::writer::TakeWriter;
use super::{CaptureError, CaptureResult};
use crate::config::EngineConfig;
use crate::store::Take;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePhase {
    Idle,
    Recording,
    Stopped,
}

/// Capture tuning, usually derived from [`EngineConfig`]
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub tick: Duration,
    pub level_history: usize,
    pub level_publish_every: u32,
    pub sample_rate: u32,
    pub temp_dir: Option<PathBuf>,
}

impl From<&EngineConfig> for CaptureSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            tick: config.tick_interval(),
            level_history: config.level_history,
            level_publish_every: config.level_publish_every,
            sample_rate: config.sample_rate,
            temp_dir: config.temp_dir.clone(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Observable capture state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureState {
    pub is_recording: bool,
    pub elapsed: f64,
    pub signal_levels: Vec<f32>,
}

/// Result of one tick
#[derive(Debug)]
pub enum CaptureTick {
    /// Not recording; nothing happened
    Idle,
    /// Time advanced
    Advanced { elapsed: f64, levels_published: bool },
    /// Maximum duration reached; the session stopped itself
    Completed(Take),
}

pub struct CaptureSession {
    phase: CapturePhase,
    device: AudioSession,
    lease: Option<DeviceLease>,
    input: Box<dyn InputDevice>,
    settings: CaptureSettings,
    writer: Option<TakeWriter>,
    max_duration: f64,
    elapsed: f64,
    ticks: u64,
    levels: LevelHistory,
    scratch: Vec<f32>,
    levels_tx: watch::Sender<Vec<f32>>,
}

impl CaptureSession {
    pub fn new(
        device: AudioSession,
        input: Box<dyn InputDevice>,
        settings: CaptureSettings,
    ) -> Self {
        let (levels_tx, _) = watch::channel(Vec::new());
        Self {
            phase: CapturePhase::Idle,
            device,
            lease: None,
            input,
            levels: LevelHistory::new(settings.level_history),
            settings,
            writer: None,
            max_duration: 0.0,
            elapsed: 0.0,
            ticks: 0,
            scratch: Vec::new(),
            levels_tx,
        }
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    pub fn is_recording(&self) -> bool {
        self.phase == CapturePhase::Recording
    }

    /// Seconds recorded so far, in tick granularity
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn max_duration(&self) -> f64 {
        self.max_duration
    }

    pub fn levels(&self) -> Vec<f32> {
        self.levels.snapshot()
    }

    pub fn state(&self) -> CaptureState {
        CaptureState {
            is_recording: self.is_recording(),
            elapsed: self.elapsed,
            signal_levels: self.levels.snapshot(),
        }
    }

    /// Level snapshots, published every `level_publish_every` ticks
    pub fn subscribe_levels(&self) -> watch::Receiver<Vec<f32>> {
        self.levels_tx.subscribe()
    }

    /// Claim the device and begin writing a take of at most `max_duration` seconds
    pub fn start(&mut self, max_duration: f64) -> CaptureResult<()> {
        if self.phase != CapturePhase::Idle {
            return Err(CaptureError::InvalidState(
                "a capture session records a single take",
            ));
        }

        let lease = self.device.activate(DeviceRole::Capture, SessionMode::Record)?;
        let format = self.input.open(self.settings.sample_rate)?;

        let temp_dir = self.settings.temp_dir.as_deref();
        let writer = match TakeWriter::create(temp_dir, format.sample_rate) {
            Ok(writer) => writer,
            Err(e) => {
                self.input.close();
                return Err(e);
            }
        };

        self.lease = Some(lease);
        self.writer = Some(writer);
        self.max_duration = max_duration.max(0.0);
        self.elapsed = 0.0;
        self.ticks = 0;
        self.levels.clear();
        self.phase = CapturePhase::Recording;

        tracing::info!(
            "Capture started on {} ({}Hz, max {:.2}s)",
            self.input.name(),
            format.sample_rate,
            self.max_duration
        );
        Ok(())
    }

    /// Advance one tick: write pending samples, meter them, check the limit
    pub fn tick(&mut self) -> CaptureResult<CaptureTick> {
        if self.phase != CapturePhase::Recording {
            return Ok(CaptureTick::Idle);
        }

        self.scratch.clear();
        self.input.read(&mut self.scratch);
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&self.scratch)?;
        }

        self.levels.push(db_to_linear(rms_db(&self.scratch)));
        self.ticks += 1;
        self.elapsed = self.ticks as f64 * self.settings.tick.as_secs_f64();

        let publish_every = u64::from(self.settings.level_publish_every.max(1));
        let levels_published = self.ticks % publish_every == 0;
        if levels_published {
            self.levels_tx.send_replace(self.levels.snapshot());
        }

        // Small slack so float accumulation cannot cost an extra tick
        if self.elapsed + 1e-9 >= self.max_duration {
            tracing::info!("Capture reached max duration ({:.2}s)", self.max_duration);
            if let Some(take) = self.stop()? {
                return Ok(CaptureTick::Completed(take));
            }
        }

        Ok(CaptureTick::Advanced {
            elapsed: self.elapsed,
            levels_published,
        })
    }

    /// Finish the take. Returns `None` when not recording.
    pub fn stop(&mut self) -> CaptureResult<Option<Take>> {
        if self.phase != CapturePhase::Recording {
            return Ok(None);
        }
        self.phase = CapturePhase::Stopped;

        self.scratch.clear();
        self.input.read(&mut self.scratch);
        self.input.close();

        let Some(mut writer) = self.writer.take() else {
            return Err(CaptureError::InvalidState("recording without a take file"));
        };
        writer.write(&self.scratch)?;
        let encoded = writer.finish()?;
        let duration = encoded.duration();

        tracing::info!(
            "Capture stopped: {:.2}s measured ({:.2}s ticked), {} bytes",
            duration,
            self.elapsed,
            encoded.bytes.len()
        );
        Ok(Some(Take::new(encoded.bytes, duration)))
    }

    /// Force-stop, release the device and clear levels
    pub fn cleanup(&mut self) {
        if self.phase == CapturePhase::Recording {
            match self.stop() {
                Ok(Some(take)) => {
                    tracing::debug!("Discarded {:.2}s take during cleanup", take.duration)
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to finalize take during cleanup: {}", e),
            }
        }
        self.input.close();
        self.writer = None;
        self.lease = None;
        self.levels.clear();
        self.levels_tx.send_replace(Vec::new());
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}
