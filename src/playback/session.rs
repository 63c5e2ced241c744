//! Playback session
//!
//! Holds the single clock that audio, video and the timeline display follow.
//! The clock is either the audio player's position (preview) or time pushed
//! in from the capture tick (recording with accompaniment).
//!
//! Video preparation runs on a spawned task; its outcome comes back as a
//! [`VideoNotice`] that the owner applies with `apply_video_notice`, so all
//! state changes happen on the owner's task.

use super::audio::AudioPlayer;
use super::video::{VideoDecoder, VideoRef, VideoSource};
use super::waveform::compute_peaks;
use super::{PlaybackError, PlaybackResult};
use crate::capture::{AudioSession, DeviceLease, DeviceRole, SessionMode};
use crate::config::EngineConfig;
use crate::timeline::{DisplayPayload, TimelineProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Stopped,
}

/// Where `current_time` comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    /// The audio player's own position
    Decoder,
    /// Pushed in by the owner, e.g. capture elapsed time
    External,
}

#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    /// Slack before `duration` that counts as end of stream
    pub end_of_stream_epsilon: f64,
    /// Video drift from an external clock that triggers a re-seek
    pub video_drift_tolerance: f64,
}

impl From<&EngineConfig> for PlaybackSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            end_of_stream_epsilon: config.end_of_stream_epsilon,
            video_drift_tolerance: config.video_drift_tolerance,
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Observable playback state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub phase: PlaybackPhase,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub is_audio_ready: bool,
    pub is_video_ready: bool,
    pub has_video: bool,
    pub play_pending: bool,
    pub active_display: Option<DisplayPayload>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            phase: PlaybackPhase::Idle,
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            is_audio_ready: false,
            is_video_ready: false,
            has_video: false,
            play_pending: false,
            active_display: None,
        }
    }
}

/// Outcome of a background video prepare
pub struct VideoNotice {
    pub generation: u64,
    pub reference: VideoRef,
    pub result: PlaybackResult<Box<dyn VideoDecoder>>,
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackTick {
    /// Not playing
    Idle,
    Advanced { current_time: f64 },
    /// Another session took the device; playback paused
    Interrupted,
    /// End of stream reached; the session stopped itself
    Finished,
}

enum VideoSlot {
    Empty,
    Loading {
        reference: VideoRef,
    },
    Ready {
        reference: VideoRef,
        decoder: Box<dyn VideoDecoder>,
    },
    Failed {
        reference: VideoRef,
    },
}

impl VideoSlot {
    fn reference(&self) -> Option<&VideoRef> {
        match self {
            VideoSlot::Empty => None,
            VideoSlot::Loading { reference }
            | VideoSlot::Ready { reference, .. }
            | VideoSlot::Failed { reference } => Some(reference),
        }
    }

    fn decoder(&mut self) -> Option<&mut Box<dyn VideoDecoder>> {
        match self {
            VideoSlot::Ready { decoder, .. } => Some(decoder),
            _ => None,
        }
    }
}

pub struct PlaybackSession {
    phase: PlaybackPhase,
    timeline: Arc<dyn TimelineProvider>,
    audio: Box<dyn AudioPlayer>,
    video_source: Arc<dyn VideoSource>,
    video: VideoSlot,
    device: AudioSession,
    lease: Option<DeviceLease>,
    settings: PlaybackSettings,
    clock: ClockSource,
    current_time: f64,
    duration: f64,
    is_audio_ready: bool,
    play_pending: bool,
    audio_volume: f32,
    video_volume: f32,
    active_display: Option<DisplayPayload>,
    /// Bumped on every attach and cleanup; older notices are stale
    generation: u64,
    notices: mpsc::UnboundedSender<VideoNotice>,
    state_tx: watch::Sender<PlaybackState>,
}

impl PlaybackSession {
    pub fn new(
        timeline: Arc<dyn TimelineProvider>,
        audio: Box<dyn AudioPlayer>,
        video_source: Arc<dyn VideoSource>,
        device: AudioSession,
        settings: PlaybackSettings,
        notices: mpsc::UnboundedSender<VideoNotice>,
    ) -> Self {
        let (state_tx, _) = watch::channel(PlaybackState::default());
        Self {
            phase: PlaybackPhase::Idle,
            timeline,
            audio,
            video_source,
            video: VideoSlot::Empty,
            device,
            lease: None,
            settings,
            clock: ClockSource::Decoder,
            current_time: 0.0,
            duration: 0.0,
            is_audio_ready: false,
            play_pending: false,
            audio_volume: 1.0,
            video_volume: 1.0,
            active_display: None,
            generation: 0,
            notices,
            state_tx,
        }
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn clock_source(&self) -> ClockSource {
        self.clock
    }

    pub fn is_playing(&self) -> bool {
        self.phase == PlaybackPhase::Playing
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn is_video_ready(&self) -> bool {
        matches!(self.video, VideoSlot::Ready { .. })
    }

    /// Position of the video decoder, when one is ready
    pub fn video_position(&self) -> Option<f64> {
        match &self.video {
            VideoSlot::Ready { decoder, .. } => Some(decoder.position()),
            _ => None,
        }
    }

    /// Audio (or the external clock) is usable and no video is still loading
    pub fn is_ready_to_play(&self) -> bool {
        let audio_ready = self.is_audio_ready || self.clock == ClockSource::External;
        audio_ready && !matches!(self.video, VideoSlot::Loading { .. })
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            phase: self.phase,
            is_playing: self.is_playing(),
            current_time: self.current_time,
            duration: self.duration,
            is_audio_ready: self.is_audio_ready,
            is_video_ready: self.is_video_ready(),
            has_video: matches!(
                self.video,
                VideoSlot::Loading { .. } | VideoSlot::Ready { .. }
            ),
            play_pending: self.play_pending,
            active_display: self.active_display.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state_tx.subscribe()
    }

    /// Decode a take and make it the clock
    pub fn load_audio(&mut self, bytes: &[u8]) -> PlaybackResult<()> {
        self.phase = PlaybackPhase::Loading;
        self.publish();

        let duration = match self.audio.load(bytes) {
            Ok(duration) => duration,
            Err(e) => {
                tracing::error!("Failed to decode take: {}", e);
                self.audio.unload();
                self.is_audio_ready = false;
                self.phase = PlaybackPhase::Idle;
                self.publish();
                return Err(e);
            }
        };

        self.audio.set_volume(self.audio_volume);
        self.clock = ClockSource::Decoder;
        self.is_audio_ready = true;
        self.duration = duration;
        self.current_time = 0.0;
        self.phase = self.settled_phase();
        self.refresh_display();
        self.publish();

        tracing::info!("Take loaded for playback ({:.2}s)", duration);
        Ok(())
    }

    /// Prepare a video in the background
    ///
    /// Re-attaching the reference that is already loading or ready only
    /// updates the volume. Attaching a different reference while one is
    /// still loading is rejected.
    pub fn attach_video(&mut self, reference: VideoRef, volume: f32) -> PlaybackResult<()> {
        self.video_volume = volume.clamp(0.0, 1.0);

        match &mut self.video {
            VideoSlot::Loading { reference: loading } if *loading == reference => {
                tracing::debug!("Video {} already loading", reference);
                return Ok(());
            }
            VideoSlot::Ready {
                reference: ready,
                decoder,
            } if *ready == reference => {
                tracing::debug!("Video {} already ready", reference);
                decoder.set_volume(self.video_volume);
                return Ok(());
            }
            VideoSlot::Loading { .. } => {
                return Err(PlaybackError::InvalidState(
                    "another video is still being prepared",
                ));
            }
            _ => {}
        }

        if let Some(decoder) = self.video.decoder() {
            decoder.stop();
        }

        self.generation += 1;
        let generation = self.generation;
        self.video = VideoSlot::Loading {
            reference: reference.clone(),
        };
        if self.phase == PlaybackPhase::Idle {
            self.phase = PlaybackPhase::Loading;
        }

        let source = Arc::clone(&self.video_source);
        let notices = self.notices.clone();
        tokio::spawn(async move {
            let result = source.prepare(&reference).await;
            if notices
                .send(VideoNotice {
                    generation,
                    reference,
                    result,
                })
                .is_err()
            {
                tracing::debug!("Video notice dropped: session owner is gone");
            }
        });

        tracing::info!("Preparing video (generation {})", generation);
        self.publish();
        Ok(())
    }

    /// Apply the outcome of a video prepare
    ///
    /// A pending play is honored here. A failed video is dropped from the
    /// session and playback continues without it.
    pub fn apply_video_notice(&mut self, notice: VideoNotice) -> PlaybackResult<()> {
        let current = matches!(
            &self.video,
            VideoSlot::Loading { reference } if *reference == notice.reference
        );
        if notice.generation != self.generation || !current {
            tracing::debug!(
                "Dropping stale video notice for {} (generation {})",
                notice.reference,
                notice.generation
            );
            return Ok(());
        }

        let outcome = match notice.result {
            Ok(mut decoder) => {
                decoder.set_volume(self.video_volume);
                decoder.seek(self.current_time);
                tracing::info!("Video {} ready", notice.reference);
                self.video = VideoSlot::Ready {
                    reference: notice.reference,
                    decoder,
                };
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Video {} failed to prepare: {}", notice.reference, e);
                self.video = VideoSlot::Failed {
                    reference: notice.reference,
                };
                Err(e)
            }
        };

        if self.phase == PlaybackPhase::Loading && self.is_ready_to_play() {
            self.phase = PlaybackPhase::Ready;
        }

        if self.play_pending {
            self.play_pending = false;
            tracing::debug!("Honoring deferred play");
            if let Err(e) = self.play() {
                self.publish();
                return Err(e);
            }
        }

        self.publish();
        outcome
    }

    /// Start playback, or defer it until the video is ready
    pub fn play(&mut self) -> PlaybackResult<()> {
        if self.is_playing() {
            return Ok(());
        }
        if !self.is_audio_ready && self.clock == ClockSource::Decoder {
            return Err(PlaybackError::InvalidState("no take loaded"));
        }
        if matches!(self.video, VideoSlot::Loading { .. }) {
            tracing::debug!("Play requested before video is ready; deferring");
            self.play_pending = true;
            self.publish();
            return Ok(());
        }

        if self.clock == ClockSource::Decoder {
            // During recording the capture session owns the device and
            // accompaniment rides on its record mode.
            if !self.lease.as_ref().is_some_and(|l| l.is_active()) {
                let mode = if self.is_video_ready() {
                    SessionMode::PlaybackWithMixing
                } else {
                    SessionMode::Playback
                };
                self.lease = Some(self.device.activate(DeviceRole::Playback, mode)?);
            }

            if self.current_time >= self.duration - self.settings.end_of_stream_epsilon {
                self.seek_decoders(0.0);
                self.current_time = 0.0;
            }
            self.audio.play();
        }

        if let Some(decoder) = self.video.decoder() {
            decoder.play();
        }

        self.play_pending = false;
        self.phase = PlaybackPhase::Playing;
        self.refresh_display();
        self.publish();
        tracing::info!("Playback started at {:.2}s", self.current_time);
        Ok(())
    }

    pub fn pause(&mut self) {
        self.play_pending = false;
        if !self.is_playing() {
            self.publish();
            return;
        }

        self.audio.pause();
        if let Some(decoder) = self.video.decoder() {
            decoder.pause();
        }
        if self.clock == ClockSource::Decoder {
            self.current_time = self.audio.position().clamp(0.0, self.duration);
        }
        self.phase = PlaybackPhase::Paused;
        self.refresh_display();
        self.publish();
        tracing::info!("Playback paused at {:.2}s", self.current_time);
    }

    /// Halt, rewind to zero and give the device back
    pub fn stop(&mut self) {
        self.audio.stop();
        if let Some(decoder) = self.video.decoder() {
            decoder.stop();
        }
        self.lease = None;
        self.play_pending = false;
        self.current_time = 0.0;
        if self.phase != PlaybackPhase::Idle {
            self.phase = PlaybackPhase::Stopped;
        }
        self.refresh_display();
        self.publish();
        tracing::info!("Playback stopped");
    }

    /// Move both decoders to `seconds`, clamped to the media, and return the
    /// position actually used
    pub fn seek(&mut self, seconds: f64) -> f64 {
        let target = if seconds.is_nan() {
            0.0
        } else {
            seconds.clamp(0.0, self.duration)
        };
        self.seek_decoders(target);
        self.current_time = target;
        self.refresh_display();
        self.publish();
        tracing::debug!("Seeked to {:.2}s", target);
        target
    }

    /// Drive the clock from outside, keeping the video in lockstep
    pub fn push_external_time(&mut self, seconds: f64) {
        if self.clock != ClockSource::External {
            tracing::warn!("Ignoring external time while the decoder drives the clock");
            return;
        }

        self.current_time = seconds.clamp(0.0, self.duration);
        let tolerance = self.settings.video_drift_tolerance;
        let current_time = self.current_time;
        if self.is_playing() {
            if let Some(decoder) = self.video.decoder() {
                let drift = decoder.position() - current_time;
                if drift.abs() > tolerance {
                    tracing::debug!("Video drifted {:.3}s; re-seeking", drift);
                    decoder.seek(current_time);
                }
            }
        }
        self.refresh_display();
        self.publish();
    }

    /// Switch to an externally driven clock over `duration` seconds
    pub fn use_external_clock(&mut self, duration: f64) {
        self.clock = ClockSource::External;
        self.duration = duration.max(0.0);
        self.current_time = 0.0;
        if self.phase == PlaybackPhase::Idle && self.is_ready_to_play() {
            self.phase = PlaybackPhase::Ready;
        }
        self.refresh_display();
        self.publish();
    }

    pub fn set_audio_volume(&mut self, volume: f32) {
        self.audio_volume = volume.clamp(0.0, 1.0);
        self.audio.set_volume(self.audio_volume);
    }

    pub fn set_video_volume(&mut self, volume: f32) {
        self.video_volume = volume.clamp(0.0, 1.0);
        let video_volume = self.video_volume;
        if let Some(decoder) = self.video.decoder() {
            decoder.set_volume(video_volume);
        }
    }

    /// Advance one tick: follow the decoder clock and detect end of stream
    pub fn tick(&mut self) -> PlaybackTick {
        if !self.is_playing() {
            return PlaybackTick::Idle;
        }

        if self.lease.as_ref().is_some_and(|l| !l.is_active()) {
            tracing::warn!("Audio device taken by another session; pausing playback");
            self.pause();
            self.lease = None;
            return PlaybackTick::Interrupted;
        }

        if self.clock == ClockSource::External {
            return PlaybackTick::Advanced {
                current_time: self.current_time,
            };
        }

        self.current_time = self.audio.position().clamp(0.0, self.duration);
        if self.current_time >= self.duration - self.settings.end_of_stream_epsilon {
            tracing::info!("Playback reached end of take");
            self.stop();
            return PlaybackTick::Finished;
        }

        self.refresh_display();
        self.publish();
        PlaybackTick::Advanced {
            current_time: self.current_time,
        }
    }

    /// Normalized peaks of the loaded take
    pub fn waveform(&self, peaks_per_second: u32) -> Option<Vec<f32>> {
        self.audio
            .samples()
            .map(|(samples, sample_rate)| compute_peaks(samples, sample_rate, peaks_per_second))
    }

    /// Drop media, invalidate in-flight video prepares and release the device
    pub fn cleanup(&mut self) {
        self.generation += 1;
        self.audio.stop();
        self.audio.unload();
        if let Some(decoder) = self.video.decoder() {
            decoder.stop();
        }
        if let Some(reference) = self.video.reference() {
            tracing::debug!("Releasing video {}", reference);
        }
        self.video = VideoSlot::Empty;
        self.lease = None;
        self.clock = ClockSource::Decoder;
        self.is_audio_ready = false;
        self.play_pending = false;
        self.current_time = 0.0;
        self.duration = 0.0;
        self.active_display = None;
        self.phase = PlaybackPhase::Idle;
        self.publish();
    }

    fn seek_decoders(&mut self, seconds: f64) {
        if self.clock == ClockSource::Decoder && self.is_audio_ready {
            self.audio.set_position(seconds);
        }
        if let Some(decoder) = self.video.decoder() {
            decoder.seek(seconds);
        }
    }

    fn settled_phase(&self) -> PlaybackPhase {
        if self.is_ready_to_play() {
            PlaybackPhase::Ready
        } else {
            PlaybackPhase::Loading
        }
    }

    fn refresh_display(&mut self) {
        self.active_display = self.timeline.event_at(self.current_time);
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state());
    }
}
