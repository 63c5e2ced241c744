//! Position clock for decoders without a hardware position of their own

use tokio::time::Instant;

/// Media position that advances with the tokio clock while running
#[derive(Debug, Clone, Default)]
pub struct PlayClock {
    /// Instant playback (re)started and the position it started from
    anchor: Option<(Instant, f64)>,
    offset: f64,
    limit: f64,
}

impl PlayClock {
    pub fn new(limit: f64) -> Self {
        Self {
            anchor: None,
            offset: 0.0,
            limit: limit.max(0.0),
        }
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn position(&self) -> f64 {
        let position = match self.anchor {
            Some((started, from)) => from + started.elapsed().as_secs_f64(),
            None => self.offset,
        };
        position.min(self.limit)
    }

    pub fn start(&mut self) {
        if self.anchor.is_none() {
            self.anchor = Some((Instant::now(), self.offset));
        }
    }

    pub fn pause(&mut self) {
        self.offset = self.position();
        self.anchor = None;
    }

    pub fn reset(&mut self) {
        self.anchor = None;
        self.offset = 0.0;
    }

    pub fn seek(&mut self, seconds: f64) {
        let target = seconds.clamp(0.0, self.limit);
        self.offset = target;
        if self.anchor.is_some() {
            self.anchor = Some((Instant::now(), target));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_clock_runs_pauses_and_clamps() {
        let mut clock = PlayClock::new(2.0);
        clock.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!((clock.position() - 0.5).abs() < 1e-6);

        clock.pause();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!((clock.position() - 0.5).abs() < 1e-6);

        clock.seek(1.8);
        clock.start();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(clock.position(), 2.0);

        clock.reset();
        assert_eq!(clock.position(), 0.0);
        assert!(!clock.is_running());
    }
}
