//! Take audio players
//!
//! `AudioPlayer` is the decoder seam of a playback session. `SpeakerPlayer`
//! sends takes to an output device; `DecodedAudioPlayer` only decodes and
//! keeps time, for headless runs and tests.

use super::clock::PlayClock;
use super::{PlaybackError, PlaybackResult};
use hound::{SampleFormat, WavReader};
use std::io::Cursor;

pub trait AudioPlayer: Send {
    /// Decode `bytes` and return the duration in seconds
    fn load(&mut self, bytes: &[u8]) -> PlaybackResult<f64>;

    fn unload(&mut self);

    fn play(&mut self);

    fn pause(&mut self);

    /// Halt and rewind to zero
    fn stop(&mut self);

    fn is_playing(&self) -> bool;

    /// Native playback position in seconds
    fn position(&self) -> f64;

    fn set_position(&mut self, seconds: f64);

    fn set_volume(&mut self, volume: f32);

    /// Decoded mono samples and their rate, when the player keeps them
    fn samples(&self) -> Option<(&[f32], u32)> {
        None
    }
}

/// Decode a WAV take into mono f32 samples
pub fn decode_wav(bytes: &[u8]) -> PlaybackResult<(Vec<f32>, u32)> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return Err(PlaybackError::Decode(format!(
            "unsupported stream: {}Hz, {} channels",
            spec.sample_rate, spec.channels
        )));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = spec.channels as usize;
    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

/// In-memory WAV player with no output device
#[derive(Debug, Default)]
pub struct DecodedAudioPlayer {
    samples: Vec<f32>,
    sample_rate: u32,
    clock: PlayClock,
    volume: f32,
}

impl DecodedAudioPlayer {
    pub fn new() -> Self {
        Self {
            volume: 1.0,
            ..Self::default()
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn duration(&self) -> f64 {
        self.clock.limit()
    }
}

impl AudioPlayer for DecodedAudioPlayer {
    fn load(&mut self, bytes: &[u8]) -> PlaybackResult<f64> {
        let (samples, sample_rate) = decode_wav(bytes)?;
        let duration = samples.len() as f64 / sample_rate as f64;

        self.samples = samples;
        self.sample_rate = sample_rate;
        self.clock = PlayClock::new(duration);

        tracing::debug!("Decoded take: {:.2}s at {}Hz", duration, sample_rate);
        Ok(duration)
    }

    fn unload(&mut self) {
        self.samples = Vec::new();
        self.sample_rate = 0;
        self.clock = PlayClock::default();
    }

    fn play(&mut self) {
        self.clock.start();
    }

    fn pause(&mut self) {
        self.clock.pause();
    }

    fn stop(&mut self) {
        self.clock.reset();
    }

    fn is_playing(&self) -> bool {
        self.clock.is_running()
    }

    fn position(&self) -> f64 {
        self.clock.position()
    }

    fn set_position(&mut self, seconds: f64) {
        self.clock.seek(seconds);
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn samples(&self) -> Option<(&[f32], u32)> {
        if self.sample_rate == 0 {
            return None;
        }
        Some((&self.samples, self.sample_rate))
    }
}

#[cfg(test)]
pub(crate) fn wav_fixture(seconds: f64, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (seconds * sample_rate as f64) as usize;
        for n in 0..frames {
            let value = if n % 2 == 0 { 8_000i16 } else { -8_000 };
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reports_duration() {
        let mut player = DecodedAudioPlayer::new();
        let duration = player.load(&wav_fixture(2.5, 8_000)).unwrap();
        assert!((duration - 2.5).abs() < 1e-9);

        let (samples, rate) = player.samples().unwrap();
        assert_eq!(rate, 8_000);
        assert_eq!(samples.len(), 20_000);
        assert!((samples[0] - 8_000.0 / 32_768.0).abs() < 1e-6);
    }

    #[test]
    fn test_garbage_bytes_are_decode_errors() {
        let mut player = DecodedAudioPlayer::new();
        assert!(matches!(
            player.load(b"definitely not a wav file"),
            Err(PlaybackError::Decode(_))
        ));
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 4_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..4_000 {
                writer.write_sample(1.0f32).unwrap();
                writer.write_sample(0.0f32).unwrap();
            }
            writer.finalize().unwrap();
        }

        let (mono, rate) = decode_wav(&cursor.into_inner()).unwrap();
        assert_eq!(rate, 4_000);
        assert_eq!(mono.len(), 4_000);
        assert!(mono.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_follows_clock() {
        let mut player = DecodedAudioPlayer::new();
        player.load(&wav_fixture(3.0, 8_000)).unwrap();
        player.set_position(1.0);
        player.play();
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        assert!((player.position() - 1.25).abs() < 1e-6);

        player.stop();
        assert_eq!(player.position(), 0.0);
        assert!(!player.is_playing());
    }
}
