//! Microphone input via cpal
//!
//! The cpal stream is not `Send` on every backend, so it lives on a
//! dedicated thread that runs until the device is closed.

use super::input::{append_downmixed, AudioDeviceInfo, InputDevice, InputFormat};
use super::{CaptureError, CaptureResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

/// List input devices so a UI can offer a selector
pub fn input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("Failed to enumerate input devices: {}", e);
            return Vec::new();
        }
    };

    devices
        .filter_map(|d| d.name().ok())
        .map(|name| AudioDeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect()
}

fn find_input_device(preferred: Option<&str>) -> Option<Device> {
    let host = cpal::default_host();
    match preferred {
        Some(wanted) => host
            .input_devices()
            .ok()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false)),
        None => host.default_input_device(),
    }
}

/// Live microphone input
pub struct Microphone {
    name: String,
    preferred_device: Option<String>,
    is_recording: Arc<AtomicBool>,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream_handle: Option<JoinHandle<()>>,
}

impl Microphone {
    /// Use the named device, or the system default when `None`
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            name: preferred_device
                .clone()
                .unwrap_or_else(|| "default microphone".to_string()),
            preferred_device,
            is_recording: Arc::new(AtomicBool::new(false)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream_handle: None,
        }
    }
}

impl Default for Microphone {
    fn default() -> Self {
        Self::new(None)
    }
}

impl InputDevice for Microphone {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, preferred_sample_rate: u32) -> CaptureResult<InputFormat> {
        if self.is_recording.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} is already capturing",
                self.name
            )));
        }

        let device = find_input_device(self.preferred_device.as_deref())
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("{} not found", self.name)))?;
        if let Ok(name) = device.name() {
            self.name = name;
        }

        let supported = device.default_input_config().map_err(|e| {
            CaptureError::DeviceUnavailable(format!("Failed to get input config: {}", e))
        })?;

        // Prefer the requested rate when the device's default range allows it
        let sample_rate = if supported.sample_rate().0 == preferred_sample_rate {
            preferred_sample_rate
        } else {
            device
                .supported_input_configs()
                .ok()
                .and_then(|mut configs| {
                    configs.find(|c| {
                        c.channels() == supported.channels()
                            && c.sample_format() == supported.sample_format()
                            && c.min_sample_rate().0 <= preferred_sample_rate
                            && c.max_sample_rate().0 >= preferred_sample_rate
                    })
                })
                .map(|_| preferred_sample_rate)
                .unwrap_or(supported.sample_rate().0)
        };
        let channels = supported.channels();
        let sample_format = supported.sample_format();

        self.buffer.lock().clear();
        self.is_recording.store(true, Ordering::SeqCst);

        let is_recording = self.is_recording.clone();
        let buffer = self.buffer.clone();
        let preferred_device = self.preferred_device.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);

        let handle = std::thread::spawn(move || {
            let Some(device) = find_input_device(preferred_device.as_deref()) else {
                let _ = ready_tx.send(Err("Input device disappeared".to_string()));
                return;
            };

            let stream_config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let channels = channels as usize;
            let err_fn =
                |err: cpal::StreamError| tracing::error!("Microphone stream error: {}", err);

            let stream = match sample_format {
                SampleFormat::F32 => {
                    let buffer = buffer.clone();
                    device.build_input_stream(
                        &stream_config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            append_downmixed(&mut buffer.lock(), data, channels, |s| s);
                        },
                        err_fn,
                        None,
                    )
                }
                SampleFormat::I16 => {
                    let buffer = buffer.clone();
                    device.build_input_stream(
                        &stream_config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            append_downmixed(&mut buffer.lock(), data, channels, |s| {
                                s as f32 / 32_768.0
                            });
                        },
                        err_fn,
                        None,
                    )
                }
                SampleFormat::U16 => {
                    let buffer = buffer.clone();
                    device.build_input_stream(
                        &stream_config,
                        move |data: &[u16], _: &cpal::InputCallbackInfo| {
                            append_downmixed(&mut buffer.lock(), data, channels, |s| {
                                (s as f32 - 32_768.0) / 32_768.0
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
                    let _ = ready_tx.send(Err(format!("Failed to build input stream: {}", e)));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(format!("Failed to start input stream: {}", e)));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while is_recording.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(20));
            }

            tracing::debug!("Microphone stream stopped");
        });

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err("Microphone thread exited early".to_string()));
        if let Err(reason) = started {
            self.is_recording.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(CaptureError::DeviceUnavailable(reason));
        }

        self.stream_handle = Some(handle);
        tracing::info!(
            "Microphone opened: {} ({}Hz, {}ch -> mono)",
            self.name,
            sample_rate,
            channels
        );
        Ok(InputFormat { sample_rate })
    }

    fn read(&mut self, out: &mut Vec<f32>) {
        out.append(&mut self.buffer.lock());
    }

    fn close(&mut self) {
        if !self.is_recording.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.stream_handle.take() {
            let _ = handle.join();
        }
        tracing::info!("Microphone closed: {}", self.name);
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.close();
    }
}
