//! Take playback through a cpal output device
//!
//! Like the microphone, the output stream lives on its own thread. The audio
//! callback pulls decoded samples from a shared play head, so the reported
//! position is whatever the device has actually consumed.

use super::audio::{decode_wav, AudioPlayer};
use super::{PlaybackError, PlaybackResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

fn find_output_device(preferred: Option<&str>) -> Option<Device> {
    let host = cpal::default_host();
    match preferred {
        Some(wanted) => host
            .output_devices()
            .ok()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false)),
        None => host.default_output_device(),
    }
}

/// Read cursor over a decoded take, shared with the output callback
#[derive(Debug, Default)]
struct PlayHead {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    /// Position in source frames; fractional when the device rate differs
    cursor: f64,
    playing: bool,
    volume: f32,
}

impl PlayHead {
    fn position(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.cursor / self.sample_rate as f64
    }

    fn seek(&mut self, seconds: f64) {
        let frames = (seconds.max(0.0) * self.sample_rate as f64).round();
        self.cursor = frames.min(self.samples.len() as f64);
    }

    /// Fill one interleaved output buffer; silence while paused or past the end
    fn render<T: Copy>(
        &mut self,
        out: &mut [T],
        channels: usize,
        output_rate: u32,
        convert: impl Fn(f32) -> T,
    ) {
        let step = if output_rate == 0 {
            0.0
        } else {
            self.sample_rate as f64 / output_rate as f64
        };

        for frame in out.chunks_mut(channels.max(1)) {
            let mut value = 0.0;
            if self.playing {
                match self.samples.get(self.cursor as usize) {
                    Some(sample) => {
                        value = sample * self.volume;
                        self.cursor += step;
                    }
                    None => {
                        self.playing = false;
                        self.cursor = self.samples.len() as f64;
                    }
                }
            }
            let value = convert(value);
            for slot in frame.iter_mut() {
                *slot = value;
            }
        }
    }
}

/// Plays decoded takes on an output device
pub struct SpeakerPlayer {
    preferred_device: Option<String>,
    head: Arc<Mutex<PlayHead>>,
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    is_streaming: Arc<AtomicBool>,
    stream_handle: Option<JoinHandle<()>>,
}

impl SpeakerPlayer {
    /// Use the named output device, or the system default when `None`
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            preferred_device,
            head: Arc::new(Mutex::new(PlayHead {
                volume: 1.0,
                ..PlayHead::default()
            })),
            samples: Arc::new(Vec::new()),
            sample_rate: 0,
            is_streaming: Arc::new(AtomicBool::new(false)),
            stream_handle: None,
        }
    }

    fn open_stream(&mut self) -> PlaybackResult<()> {
        if self.is_streaming.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = find_output_device(self.preferred_device.as_deref())
            .ok_or_else(|| PlaybackError::DeviceUnavailable("no output device".to_string()))?;
        let supported = device.default_output_config().map_err(|e| {
            PlaybackError::DeviceUnavailable(format!("Failed to get output config: {}", e))
        })?;
        let channels = supported.channels();
        let output_rate = supported.sample_rate().0;
        let sample_format = supported.sample_format();

        self.is_streaming.store(true, Ordering::SeqCst);
        let is_streaming = self.is_streaming.clone();
        let head = self.head.clone();
        let preferred_device = self.preferred_device.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<String, String>>(1);

        let handle = std::thread::spawn(move || {
            let Some(device) = find_output_device(preferred_device.as_deref()) else {
                let _ = ready_tx.send(Err("Output device disappeared".to_string()));
                return;
            };

            let stream_config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(output_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let channels = channels as usize;
            let err_fn = |err: cpal::StreamError| tracing::error!("Speaker stream error: {}", err);

            let stream = match sample_format {
                SampleFormat::F32 => {
                    let head = head.clone();
                    device.build_output_stream(
                        &stream_config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            head.lock().render(data, channels, output_rate, |s| s);
                        },
                        err_fn,
                        None,
                    )
                }
                SampleFormat::I16 => {
                    let head = head.clone();
                    device.build_output_stream(
                        &stream_config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            head.lock().render(data, channels, output_rate, |s| {
                                (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                            });
                        },
                        err_fn,
                        None,
                    )
                }
                SampleFormat::U16 => {
                    let head = head.clone();
                    device.build_output_stream(
                        &stream_config,
                        move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                            head.lock().render(data, channels, output_rate, |s| {
                                (s.clamp(-1.0, 1.0) * 32_767.0 + 32_768.0) as u16
                            });
                        },
                        err_fn,
                        None,
                    )
                }
                other => {
                    let _ = ready_tx.send(Err(format!("Unsupported sample format: {:?}", other)));
                    return;
                }
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("Failed to build output stream: {}", e)));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(format!("Failed to start output stream: {}", e)));
                return;
            }
            let name = device.name().unwrap_or_else(|_| "output device".to_string());
            let _ = ready_tx.send(Ok(name));

            while is_streaming.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(20));
            }

            tracing::debug!("Speaker stream stopped");
        });

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err("Speaker thread exited early".to_string()));
        match started {
            Ok(name) => {
                self.stream_handle = Some(handle);
                tracing::info!(
                    "Speaker opened: {} ({}Hz, {}ch)",
                    name,
                    output_rate,
                    channels
                );
                Ok(())
            }
            Err(reason) => {
                self.is_streaming.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(PlaybackError::DeviceUnavailable(reason))
            }
        }
    }

    fn close_stream(&mut self) {
        if !self.is_streaming.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.stream_handle.take() {
            let _ = handle.join();
        }
        tracing::info!("Speaker closed");
    }
}

impl Default for SpeakerPlayer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AudioPlayer for SpeakerPlayer {
    fn load(&mut self, bytes: &[u8]) -> PlaybackResult<f64> {
        let (samples, sample_rate) = decode_wav(bytes)?;
        let duration = samples.len() as f64 / sample_rate as f64;
        let samples = Arc::new(samples);

        {
            let mut head = self.head.lock();
            head.samples = samples.clone();
            head.sample_rate = sample_rate;
            head.cursor = 0.0;
            head.playing = false;
        }
        self.samples = samples;
        self.sample_rate = sample_rate;

        self.open_stream()?;
        tracing::debug!("Loaded take for output: {:.2}s at {}Hz", duration, sample_rate);
        Ok(duration)
    }

    fn unload(&mut self) {
        self.close_stream();
        let mut head = self.head.lock();
        head.samples = Arc::new(Vec::new());
        head.sample_rate = 0;
        head.cursor = 0.0;
        head.playing = false;
        self.samples = Arc::new(Vec::new());
        self.sample_rate = 0;
    }

    fn play(&mut self) {
        self.head.lock().playing = true;
    }

    fn pause(&mut self) {
        self.head.lock().playing = false;
    }

    fn stop(&mut self) {
        let mut head = self.head.lock();
        head.playing = false;
        head.cursor = 0.0;
    }

    fn is_playing(&self) -> bool {
        self.head.lock().playing
    }

    fn position(&self) -> f64 {
        self.head.lock().position()
    }

    fn set_position(&mut self, seconds: f64) {
        self.head.lock().seek(seconds);
    }

    fn set_volume(&mut self, volume: f32) {
        self.head.lock().volume = volume.clamp(0.0, 1.0);
    }

    fn samples(&self) -> Option<(&[f32], u32)> {
        if self.sample_rate == 0 {
            return None;
        }
        Some((self.samples.as_slice(), self.sample_rate))
    }
}

impl Drop for SpeakerPlayer {
    fn drop(&mut self) {
        self.close_stream();
    }
}
