//! Signal level metering
//!
//! Levels are RMS power in dBFS, converted to a linear 0..1 value for the
//! waveform strip.

use std::collections::VecDeque;

/// Level reported for silence or an empty window
pub const FLOOR_DB: f32 = -160.0;

/// RMS level of `samples` in dBFS
pub fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return FLOOR_DB;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    if energy <= 0.0 {
        return FLOOR_DB;
    }
    (10.0 * energy.log10()).max(FLOOR_DB)
}

/// Convert decibels to a linear amplitude
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0).clamp(0.0, 1.0)
}

/// Bounded history of recent normalized levels
#[derive(Debug, Clone)]
pub struct LevelHistory {
    levels: VecDeque<f32>,
    capacity: usize,
}

impl LevelHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            levels: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a level, dropping the oldest when full
    pub fn push(&mut self, level: f32) {
        if self.levels.len() == self.capacity {
            self.levels.pop_front();
        }
        self.levels.push_back(level);
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<f32> {
        self.levels.iter().copied().collect()
    }
}
