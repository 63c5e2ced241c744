//! Input device abstraction
//!
//! A capture session pulls mono f32 samples from an `InputDevice` once per
//! tick. Devices buffer whatever arrived since the previous read.

use super::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use tokio::time::Instant;

/// Information about an audio input device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Device name, also used to select it
    pub name: String,

    /// Whether this is the default device
    pub is_default: bool,
}

/// Negotiated stream format (always mono after downmixing)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFormat {
    pub sample_rate: u32,
}

/// Source of microphone samples
pub trait InputDevice: Send {
    /// Human-readable device name for logs
    fn name(&self) -> &str;

    /// Claim the device and start buffering samples
    ///
    /// Fails with `DeviceUnavailable` when the device is missing or busy.
    fn open(&mut self, preferred_sample_rate: u32) -> CaptureResult<InputFormat>;

    /// Move every buffered mono sample into `out`
    fn read(&mut self, out: &mut Vec<f32>);

    /// Stop the stream and release the device. Safe to call repeatedly.
    fn close(&mut self);
}

/// Downmix interleaved frames to mono, converting each sample with `convert`
pub(crate) fn append_downmixed<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().copied().map(&mut convert).sum();
        buf.push(sum / frame.len() as f32);
    }
}

/// Deterministic sine source paced by the tokio clock
///
/// Produces exactly as many samples as wall (or paused test) time allows,
/// so takes recorded from it have a real, measurable duration.
#[derive(Debug)]
pub struct SignalGenerator {
    name: String,
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    opened_at: Option<Instant>,
    emitted: u64,
}

impl SignalGenerator {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            name: format!("signal-{}hz", frequency),
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            sample_rate: 0,
            opened_at: None,
            emitted: 0,
        }
    }

    /// Generator that outputs digital silence
    pub fn silence() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new(440.0, 0.5)
    }
}

impl InputDevice for SignalGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, preferred_sample_rate: u32) -> CaptureResult<InputFormat> {
        if self.opened_at.is_some() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} is already open",
                self.name
            )));
        }
        self.sample_rate = preferred_sample_rate.max(1);
        self.opened_at = Some(Instant::now());
        self.emitted = 0;
        Ok(InputFormat {
            sample_rate: self.sample_rate,
        })
    }

    fn read(&mut self, out: &mut Vec<f32>) {
        let Some(opened_at) = self.opened_at else {
            return;
        };

        let due = (opened_at.elapsed().as_secs_f64() * self.sample_rate as f64) as u64;
        let rate = self.sample_rate as f32;
        out.extend((self.emitted..due).map(|n| {
            let t = n as f32 / rate;
            self.amplitude * (TAU * self.frequency * t).sin()
        }));
        self.emitted = self.emitted.max(due);
    }

    fn close(&mut self) {
        self.opened_at = None;
    }
}
