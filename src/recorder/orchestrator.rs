//! Recording/playback orchestrator
//!
//! One control task owns the capture and playback sessions and applies every
//! state change. Callers talk to it through [`OrchestratorHandle`]; saves,
//! loads, deletes and video prepares run on spawned tasks and report back to
//! the control task before anything is mutated.

use super::state::{EngineEvent, EngineState, Phase};
use crate::capture::{AudioSession, CaptureSession, CaptureSettings, CaptureTick, InputDevice};
use crate::config::EngineConfig;
use crate::playback::{
    AudioPlayer, PlaybackSession, PlaybackSettings, PlaybackTick, VideoNotice, VideoRef,
    VideoSource,
};
use crate::store::{RecordingStore, StoreResult, Take, TakeId};
use crate::timeline::{DisplayPayload, TimelineProvider};
use crate::utils::{EngineError, EngineResult, ErrorResponse};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

/// Builds a fresh input device for each recording
pub type InputFactory = Box<dyn Fn() -> Box<dyn InputDevice> + Send>;

type Reply<T> = oneshot::Sender<EngineResult<T>>;

/// Collaborators the engine runs against
pub struct EngineParts {
    pub timeline: Arc<dyn TimelineProvider>,
    pub store: Arc<dyn RecordingStore>,
    pub device: AudioSession,
    pub input: InputFactory,
    pub audio: Box<dyn AudioPlayer>,
    pub video_source: Arc<dyn VideoSource>,
    /// Accompaniment video played during recording and preview
    pub video: Option<VideoRef>,
}

enum Command {
    StartRecording(Reply<()>),
    StopRecording(Reply<TakeId>),
    Play(Reply<()>),
    Pause(Reply<()>),
    Seek(f64, Reply<f64>),
    Forward(Reply<f64>),
    Backward(Reply<f64>),
    Scrub(f64, Reply<Option<DisplayPayload>>),
    ReleaseScrub(Reply<f64>),
    Delete(Reply<()>),
    OpenTake(TakeId, Reply<TakeId>),
    SetAudioVolume(f32, Reply<()>),
    SetVideoVolume(f32, Reply<()>),
    Waveform(u32, Reply<Option<Vec<f32>>>),
    Shutdown(oneshot::Sender<()>),
}

/// Outcome of a background store call
enum TaskOutcome {
    Saved(StoreResult<TakeId>),
    Loaded {
        take_id: TakeId,
        result: StoreResult<Option<(Vec<u8>, f64)>>,
    },
    Deleted(StoreResult<()>),
}

struct TaskResult {
    /// Teardown bumps the epoch so late results are ignored
    epoch: u64,
    outcome: TaskOutcome,
}

/// Control task state
pub struct Orchestrator {
    config: EngineConfig,
    timeline: Arc<dyn TimelineProvider>,
    store: Arc<dyn RecordingStore>,
    device: AudioSession,
    input: InputFactory,
    video: Option<VideoRef>,
    capture: Option<CaptureSession>,
    playback: PlaybackSession,
    phase: Phase,
    take_id: Option<TakeId>,
    /// Captured take kept until it is saved
    unsaved: Option<Take>,
    levels: Vec<f32>,
    scrub_position: Option<f64>,
    scrub_display: Option<DisplayPayload>,
    preview_audio_volume: f32,
    preview_video_volume: f32,
    error: Option<ErrorResponse>,
    epoch: u64,
    pending_take: Option<Reply<TakeId>>,
    pending_delete: Option<Reply<()>>,
    tasks: mpsc::UnboundedSender<TaskResult>,
    state_tx: watch::Sender<EngineState>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Orchestrator {
    /// Start the control task and return a handle to it
    ///
    /// The config is validated first; a rejected config spawns nothing.
    pub fn spawn(config: EngineConfig, parts: EngineParts) -> EngineResult<OrchestratorHandle> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(32);
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EngineState::default());
        let (event_tx, _) = broadcast::channel(100);

        let playback = PlaybackSession::new(
            Arc::clone(&parts.timeline),
            parts.audio,
            parts.video_source,
            parts.device.clone(),
            PlaybackSettings::from(&config),
            notice_tx,
        );

        let orchestrator = Self {
            preview_audio_volume: config.preview_audio_volume,
            preview_video_volume: config.preview_video_volume,
            config,
            timeline: parts.timeline,
            store: parts.store,
            device: parts.device,
            input: parts.input,
            video: parts.video,
            capture: None,
            playback,
            phase: Phase::Uninitialized,
            take_id: None,
            unsaved: None,
            levels: Vec::new(),
            scrub_position: None,
            scrub_display: None,
            error: None,
            epoch: 0,
            pending_take: None,
            pending_delete: None,
            tasks: task_tx,
            state_tx,
            event_tx: event_tx.clone(),
        };
        orchestrator.publish();

        tokio::spawn(orchestrator.run(command_rx, task_rx, notice_rx));

        Ok(OrchestratorHandle {
            commands: command_tx,
            state: state_rx,
            events: event_tx,
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut tasks: mpsc::UnboundedReceiver<TaskResult>,
        mut notices: mpsc::UnboundedReceiver<VideoNotice>,
    ) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut was_ticking = false;

        tracing::info!("Engine control task started");
        loop {
            let ticking = self.needs_tick();
            if ticking && !was_ticking {
                ticker.reset();
            }
            was_ticking = ticking;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(result) = tasks.recv() => self.apply_task(result),
                Some(notice) = notices.recv() => self.apply_video_notice(notice),
                _ = ticker.tick(), if ticking => self.on_tick(),
            }
        }
        tracing::info!("Engine control task stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::StartRecording(reply) => {
                let result = self.start_recording();
                self.finish(reply, result);
            }
            Command::StopRecording(reply) => self.stop_recording(reply),
            Command::Play(reply) => {
                let result = self.play();
                self.finish(reply, result);
            }
            Command::Pause(reply) => {
                let result = self.pause();
                self.finish(reply, result);
            }
            Command::Seek(seconds, reply) => {
                let result = self.seek(seconds);
                self.finish(reply, result);
            }
            Command::Forward(reply) => {
                let result = self.skip(self.config.skip_seconds);
                self.finish(reply, result);
            }
            Command::Backward(reply) => {
                let result = self.skip(-self.config.skip_seconds);
                self.finish(reply, result);
            }
            Command::Scrub(seconds, reply) => {
                let result = self.scrub(seconds);
                self.finish(reply, result);
            }
            Command::ReleaseScrub(reply) => {
                let result = self.release_scrub();
                self.finish(reply, result);
            }
            Command::Delete(reply) => self.delete(reply),
            Command::OpenTake(take_id, reply) => self.open_take(take_id, reply),
            Command::SetAudioVolume(volume, reply) => {
                self.set_audio_volume(volume);
                self.finish(reply, Ok(()));
            }
            Command::SetVideoVolume(volume, reply) => {
                self.set_video_volume(volume);
                self.finish(reply, Ok(()));
            }
            Command::Waveform(peaks_per_second, reply) => {
                let result = Ok(self.playback.waveform(peaks_per_second));
                self.finish(reply, result);
            }
            Command::Shutdown(_) => {}
        }
    }

    /// Publish the new state and answer the caller
    fn finish<T>(&self, reply: Reply<T>, result: EngineResult<T>) {
        self.answer(Some(reply), result);
    }

    /// Publish first so the caller sees the state its reply refers to
    fn answer<T>(&self, reply: Option<Reply<T>>, result: EngineResult<T>) {
        self.publish();
        if let Some(reply) = reply {
            if reply.send(result).is_err() {
                tracing::debug!("Caller dropped before the reply was sent");
            }
        }
    }

    fn needs_tick(&self) -> bool {
        self.capture.as_ref().is_some_and(|c| c.is_recording()) || self.playback.is_playing()
    }

    fn start_recording(&mut self) -> EngineResult<()> {
        if !matches!(self.phase, Phase::Uninitialized | Phase::Dismissed) {
            return Err(EngineError::invalid_state(format!(
                "cannot start recording while {:?}",
                self.phase
            )));
        }

        self.playback.cleanup();
        self.error = None;
        self.take_id = None;
        self.unsaved = None;
        self.levels.clear();

        let max_duration = self.timeline.total_duration();
        let mut capture = CaptureSession::new(
            self.device.clone(),
            (self.input)(),
            CaptureSettings::from(&self.config),
        );
        if let Err(e) = capture.start(max_duration) {
            tracing::error!("Failed to start capture: {}", e);
            return Err(self.surface(e.into()));
        }

        self.playback.use_external_clock(max_duration);
        if let Err(e) = self.start_accompaniment() {
            capture.cleanup();
            self.playback.cleanup();
            return Err(self.surface(e));
        }

        self.capture = Some(capture);
        self.phase = Phase::Recording;
        self.emit(EngineEvent::RecordingStarted { max_duration });
        tracing::info!("Recording started (max {:.2}s)", max_duration);
        Ok(())
    }

    /// Muted video alongside the capture; play waits for the video if needed
    fn start_accompaniment(&mut self) -> EngineResult<()> {
        if let Some(video) = self.video.clone() {
            self.playback
                .attach_video(video, self.config.record_video_volume)?;
        }
        self.playback.play()?;
        Ok(())
    }

    fn stop_recording(&mut self, reply: Reply<TakeId>) {
        match self.phase {
            Phase::Recording => {
                let stopped = self.capture.as_mut().map(|c| c.stop());
                match stopped {
                    Some(Ok(Some(take))) => self.begin_save(take, Some(reply)),
                    Some(Ok(None)) | None => {
                        let error = EngineError::invalid_state("capture is not running");
                        self.finish(reply, Err(error));
                    }
                    Some(Err(e)) => {
                        tracing::error!("Failed to finalize take: {}", e);
                        self.teardown();
                        self.phase = Phase::Uninitialized;
                        let error = self.surface(e.into());
                        self.finish(reply, Err(error));
                    }
                }
            }
            Phase::SaveFailed => match self.unsaved.clone() {
                Some(take) => {
                    tracing::info!("Retrying save of {:.2}s take", take.duration);
                    self.begin_save(take, Some(reply));
                }
                None => {
                    let error = EngineError::invalid_state("no take to save");
                    self.finish(reply, Err(error));
                }
            },
            Phase::SavingTake if self.pending_take.is_none() => {
                // Auto-stop got there first; answer when the save lands
                self.pending_take = Some(reply);
            }
            phase => {
                let error = EngineError::invalid_state(format!("cannot stop while {:?}", phase));
                self.finish(reply, Err(error));
            }
        }
    }

    /// Persist the take in the background; capture is already quiesced
    fn begin_save(&mut self, take: Take, reply: Option<Reply<TakeId>>) {
        if self.phase == Phase::Recording {
            self.playback.pause();
            self.emit(EngineEvent::RecordingStopped {
                duration: take.duration,
            });
        }

        self.phase = Phase::SavingTake;
        self.error = None;
        self.pending_take = reply;

        let store = Arc::clone(&self.store);
        let tasks = self.tasks.clone();
        let epoch = self.epoch;
        let audio_bytes = take.audio_bytes.clone();
        let duration = take.duration;
        self.unsaved = Some(take);

        tokio::spawn(async move {
            let result = store.save(audio_bytes, duration).await;
            let _ = tasks.send(TaskResult {
                epoch,
                outcome: TaskOutcome::Saved(result),
            });
        });

        tracing::info!("Saving take ({:.2}s)", duration);
        self.publish();
    }

    fn spawn_load(&mut self, take_id: TakeId) {
        let store = Arc::clone(&self.store);
        let tasks = self.tasks.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = store.load(&take_id).await;
            let _ = tasks.send(TaskResult {
                epoch,
                outcome: TaskOutcome::Loaded { take_id, result },
            });
        });
    }

    fn apply_task(&mut self, result: TaskResult) {
        if result.epoch != self.epoch {
            tracing::debug!("Ignoring background result from epoch {}", result.epoch);
            return;
        }

        match result.outcome {
            TaskOutcome::Saved(Ok(take_id)) => {
                tracing::info!("Take saved as {}", take_id);
                // Capture gives the device back before playback claims it
                if let Some(mut capture) = self.capture.take() {
                    capture.cleanup();
                }
                self.unsaved = None;
                self.take_id = Some(take_id.clone());
                self.emit(EngineEvent::TakeSaved {
                    take_id: take_id.clone(),
                });
                self.spawn_load(take_id);
            }
            TaskOutcome::Saved(Err(e)) => {
                tracing::error!("Failed to save take: {}", e);
                if let Some(mut capture) = self.capture.take() {
                    capture.cleanup();
                }
                self.phase = Phase::SaveFailed;
                let error = self.surface(e.into());
                self.emit(EngineEvent::SaveFailed {
                    message: error.to_string(),
                });
                let reply = self.pending_take.take();
                self.answer(reply, Err(error));
            }
            TaskOutcome::Loaded { take_id, result } => {
                let outcome = match result {
                    Ok(Some((bytes, _))) => self.enter_preview(&take_id, &bytes),
                    Ok(None) => Err("take not found in store".to_string()),
                    Err(e) => Err(e.to_string()),
                };
                let reply_result = match outcome {
                    Ok(()) => Ok(take_id),
                    Err(reason) => {
                        tracing::error!("Preview unavailable for {}: {}", take_id, reason);
                        self.playback.cleanup();
                        self.phase = Phase::Uninitialized;
                        Err(self.surface(EngineError::PreviewUnavailable { take_id, reason }))
                    }
                };
                let reply = self.pending_take.take();
                self.answer(reply, reply_result);
            }
            TaskOutcome::Deleted(Ok(())) => {
                tracing::info!("Take deleted; dismissing");
                self.teardown();
                self.phase = Phase::Dismissed;
                self.emit(EngineEvent::Dismissed);
                let reply = self.pending_delete.take();
                self.answer(reply, Ok(()));
            }
            TaskOutcome::Deleted(Err(e)) => {
                tracing::error!("Failed to delete take: {}", e);
                let error = self.surface(e.into());
                let reply = self.pending_delete.take();
                self.answer(reply, Err(error));
            }
        }
        self.publish();
    }

    /// Load saved bytes as the authoritative audio and rewind
    fn enter_preview(&mut self, take_id: &TakeId, bytes: &[u8]) -> Result<(), String> {
        self.playback.cleanup();
        self.playback.load_audio(bytes).map_err(|e| e.to_string())?;
        self.playback.set_audio_volume(self.preview_audio_volume);
        if let Some(video) = self.video.clone() {
            self.playback
                .attach_video(video, self.preview_video_volume)
                .map_err(|e| e.to_string())?;
        }
        self.playback.seek(0.0);

        self.phase = Phase::Previewing;
        self.error = None;
        self.emit(EngineEvent::PreviewReady {
            take_id: take_id.clone(),
            duration: self.playback.duration(),
        });
        tracing::info!("Previewing take {} ({:.2}s)", take_id, self.playback.duration());
        Ok(())
    }

    fn open_take(&mut self, take_id: TakeId, reply: Reply<TakeId>) {
        let busy = matches!(
            self.phase,
            Phase::Recording | Phase::SavingTake | Phase::LoadingTake
        );
        if busy || self.pending_take.is_some() {
            let error =
                EngineError::invalid_state(format!("cannot open a take while {:?}", self.phase));
            self.finish(reply, Err(error));
            return;
        }

        tracing::info!("Opening take {}", take_id);
        self.phase = Phase::LoadingTake;
        self.playback.cleanup();
        self.scrub_position = None;
        self.scrub_display = None;
        self.unsaved = None;
        self.error = None;
        self.take_id = Some(take_id.clone());
        self.pending_take = Some(reply);
        self.spawn_load(take_id);
        self.publish();
    }

    fn ensure_previewing(&self) -> EngineResult<()> {
        match self.phase {
            Phase::Previewing => Ok(()),
            phase => Err(EngineError::invalid_state(format!(
                "playback controls need a preview, engine is {:?}",
                phase
            ))),
        }
    }

    fn play(&mut self) -> EngineResult<()> {
        self.ensure_previewing()?;
        self.playback.play()?;
        Ok(())
    }

    fn pause(&mut self) -> EngineResult<()> {
        self.ensure_previewing()?;
        self.playback.pause();
        Ok(())
    }

    fn seek(&mut self, seconds: f64) -> EngineResult<f64> {
        self.ensure_previewing()?;
        Ok(self.playback.seek(seconds))
    }

    fn skip(&mut self, delta: f64) -> EngineResult<f64> {
        self.ensure_previewing()?;
        let target = self.playback.current_time() + delta;
        Ok(self.playback.seek(target))
    }

    /// Drag feedback: pause and show the cue under the finger
    fn scrub(&mut self, seconds: f64) -> EngineResult<Option<DisplayPayload>> {
        match self.phase {
            Phase::Previewing => {
                self.playback.pause();
                self.phase = Phase::ScrubbingPreview;
                tracing::debug!("Scrub started");
            }
            Phase::ScrubbingPreview => {}
            phase => {
                return Err(EngineError::invalid_state(format!(
                    "cannot scrub while {:?}",
                    phase
                )))
            }
        }

        let position = if seconds.is_nan() {
            0.0
        } else {
            seconds.clamp(0.0, self.playback.duration())
        };
        let display = self.timeline.event_at(position);
        self.scrub_position = Some(position);
        self.scrub_display = display.clone();
        Ok(display)
    }

    fn release_scrub(&mut self) -> EngineResult<f64> {
        if self.phase != Phase::ScrubbingPreview {
            return Err(EngineError::invalid_state("no scrub in progress"));
        }
        let target = self
            .scrub_position
            .take()
            .unwrap_or_else(|| self.playback.current_time());
        self.scrub_display = None;
        self.phase = Phase::Previewing;
        let position = self.playback.seek(target);
        tracing::debug!("Scrub released at {:.2}s", position);
        Ok(position)
    }

    fn delete(&mut self, reply: Reply<()>) {
        let Some(take_id) = self.take_id.clone() else {
            let error = EngineError::invalid_state("no saved take to delete");
            self.finish(reply, Err(error));
            return;
        };
        if self.pending_delete.is_some() {
            let error = EngineError::invalid_state("a delete is already in progress");
            self.finish(reply, Err(error));
            return;
        }

        tracing::info!("Deleting take {}", take_id);
        self.pending_delete = Some(reply);
        let store = Arc::clone(&self.store);
        let tasks = self.tasks.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = store.delete(&take_id).await;
            let _ = tasks.send(TaskResult {
                epoch,
                outcome: TaskOutcome::Deleted(result),
            });
        });
    }

    fn set_audio_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        if self.phase != Phase::Recording {
            self.preview_audio_volume = volume;
        }
        self.playback.set_audio_volume(volume);
    }

    fn set_video_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        if self.phase != Phase::Recording {
            self.preview_video_volume = volume;
        }
        self.playback.set_video_volume(volume);
    }

    fn apply_video_notice(&mut self, notice: VideoNotice) {
        if let Err(e) = self.playback.apply_video_notice(notice) {
            self.surface(e.into());
        }
        self.publish();
    }

    fn on_tick(&mut self) {
        if self.phase == Phase::Recording {
            self.tick_recording();
            self.publish();
            return;
        }

        let tick = self.playback.tick();
        self.publish();
        match tick {
            PlaybackTick::Finished => self.emit(EngineEvent::PlaybackFinished),
            PlaybackTick::Interrupted => {
                tracing::warn!("Preview interrupted by another audio session");
            }
            PlaybackTick::Advanced { .. } | PlaybackTick::Idle => {}
        }
    }

    fn tick_recording(&mut self) {
        let Some(capture) = self.capture.as_mut() else {
            return;
        };

        match capture.tick() {
            Ok(CaptureTick::Advanced {
                elapsed,
                levels_published,
            }) => {
                if levels_published {
                    self.levels = capture.levels();
                }
                self.playback.push_external_time(elapsed);
                self.playback.tick();
            }
            Ok(CaptureTick::Completed(take)) => {
                self.levels = capture.levels();
                self.playback.push_external_time(take.duration);
                self.begin_save(take, None);
            }
            Ok(CaptureTick::Idle) => {}
            Err(e) => {
                tracing::error!("Capture failed mid-take: {}", e);
                self.teardown();
                self.phase = Phase::Uninitialized;
                self.surface(e.into());
            }
        }
    }

    /// Tear both sessions down synchronously and invalidate background work
    fn teardown(&mut self) {
        self.epoch += 1;
        if let Some(mut capture) = self.capture.take() {
            capture.cleanup();
        }
        self.playback.cleanup();
        self.take_id = None;
        self.unsaved = None;
        self.levels.clear();
        self.scrub_position = None;
        self.scrub_display = None;
        if let Some(reply) = self.pending_take.take() {
            let _ = reply.send(Err(EngineError::invalid_state("engine was torn down")));
        }
    }

    /// Record an error for observers and hand it back
    fn surface(&mut self, error: EngineError) -> EngineError {
        let response = ErrorResponse::from(&error);
        self.error = Some(response.clone());
        self.emit(EngineEvent::Error(response));
        error
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn snapshot(&self) -> EngineState {
        let playback = self.playback.state();
        let recording = self.phase == Phase::Recording;

        let (current_time, active_display) = match self.scrub_position {
            Some(position) if self.phase == Phase::ScrubbingPreview => {
                (position, self.scrub_display.clone())
            }
            _ => (playback.current_time, playback.active_display),
        };

        EngineState {
            phase: self.phase,
            is_recording: self.capture.as_ref().is_some_and(|c| c.is_recording()),
            is_playing: playback.is_playing,
            current_time: if recording {
                self.capture.as_ref().map_or(0.0, |c| c.elapsed())
            } else {
                current_time
            },
            duration: if recording {
                self.timeline.total_duration()
            } else {
                playback.duration
            },
            active_display,
            levels: self.levels.clone(),
            take_id: self.take_id.clone(),
            has_video: playback.has_video,
            is_video_ready: playback.is_video_ready,
            error: self.error.clone(),
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }
}

/// Cloneable handle to the engine control task
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<EngineState>,
    events: broadcast::Sender<EngineEvent>,
}

impl OrchestratorHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> EngineResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| EngineError::ControlTaskClosed)?;
        response.await.map_err(|_| EngineError::ControlTaskClosed)?
    }

    /// Begin capturing a take against the timeline
    pub async fn start_recording(&self) -> EngineResult<()> {
        self.request(Command::StartRecording).await
    }

    /// Stop capturing, or retry a failed save
    ///
    /// Resolves once the take is saved and loaded for preview.
    pub async fn stop_recording(&self) -> EngineResult<TakeId> {
        self.request(Command::StopRecording).await
    }

    pub async fn play(&self) -> EngineResult<()> {
        self.request(Command::Play).await
    }

    pub async fn pause(&self) -> EngineResult<()> {
        self.request(Command::Pause).await
    }

    /// Seek the preview; returns the clamped position
    pub async fn seek(&self, seconds: f64) -> EngineResult<f64> {
        self.request(|reply| Command::Seek(seconds, reply)).await
    }

    pub async fn forward(&self) -> EngineResult<f64> {
        self.request(Command::Forward).await
    }

    pub async fn backward(&self) -> EngineResult<f64> {
        self.request(Command::Backward).await
    }

    /// Drag the preview to `seconds` and get the cue shown there
    pub async fn scrub(&self, seconds: f64) -> EngineResult<Option<DisplayPayload>> {
        self.request(|reply| Command::Scrub(seconds, reply)).await
    }

    /// End a drag with a single seek to the last scrub position
    pub async fn release_scrub(&self) -> EngineResult<f64> {
        self.request(Command::ReleaseScrub).await
    }

    /// Delete the saved take and dismiss both sessions
    pub async fn delete(&self) -> EngineResult<()> {
        self.request(Command::Delete).await
    }

    /// Preview a take that was saved earlier
    pub async fn open_take(&self, take_id: TakeId) -> EngineResult<TakeId> {
        self.request(|reply| Command::OpenTake(take_id, reply)).await
    }

    pub async fn set_audio_volume(&self, volume: f32) -> EngineResult<()> {
        self.request(|reply| Command::SetAudioVolume(volume, reply)).await
    }

    pub async fn set_video_volume(&self, volume: f32) -> EngineResult<()> {
        self.request(|reply| Command::SetVideoVolume(volume, reply)).await
    }

    /// Normalized peaks of the previewed take
    pub async fn waveform(&self, peaks_per_second: u32) -> EngineResult<Option<Vec<f32>>> {
        self.request(|reply| Command::Waveform(peaks_per_second, reply)).await
    }

    /// Tear everything down and stop the control task
    pub async fn shutdown(&self) -> EngineResult<()> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(reply))
            .await
            .map_err(|_| EngineError::ControlTaskClosed)?;
        done.await.map_err(|_| EngineError::ControlTaskClosed)
    }

    /// Latest published state
    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DeviceRole, SessionMode, SignalGenerator};
    use crate::playback::audio::wav_fixture;
    use crate::playback::DecodedAudioPlayer;
    use crate::test_support::{script_timeline, GatedVideoSource, MemoryStore};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Harness {
        handle: OrchestratorHandle,
        store: Arc<MemoryStore>,
        device: AudioSession,
        video_source: GatedVideoSource,
        _dir: TempDir,
    }

    fn harness(video: Option<&str>) -> Harness {
        let dir = tempdir().unwrap();
        let config = EngineConfig {
            sample_rate: 8_000,
            temp_dir: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        let device = AudioSession::new();
        let video_source = GatedVideoSource::ready();

        let handle = Orchestrator::spawn(
            config,
            EngineParts {
                timeline: script_timeline(),
                store: store.clone(),
                device: device.clone(),
                input: Box::new(|| Box::new(SignalGenerator::default())),
                audio: Box::new(DecodedAudioPlayer::new()),
                video_source: Arc::new(video_source.clone()),
                video: video.map(VideoRef::new),
            },
        )
        .unwrap();

        Harness {
            handle,
            store,
            device,
            video_source,
            _dir: dir,
        }
    }

    async fn wait_for_phase(handle: &OrchestratorHandle, phase: Phase) -> EngineState {
        let mut states = handle.subscribe();
        let state = states.wait_for(|s| s.phase == phase).await.unwrap();
        state.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_stop_at_timeline_end() {
        let h = harness(None);
        let mut events = h.handle.events();
        h.handle.start_recording().await.unwrap();
        assert!(h.handle.state().is_recording);

        let duration = loop {
            match events.recv().await.unwrap() {
                EngineEvent::RecordingStopped { duration } => break duration,
                _ => continue,
            }
        };
        assert!((duration - 10.0).abs() <= 0.1, "take lasted {}", duration);

        let state = wait_for_phase(&h.handle, Phase::Previewing).await;
        assert!(!state.is_recording);
        assert!(state.take_id.is_some());
        assert!((state.duration - duration).abs() < 1e-6);
        assert_eq!(state.current_time, 0.0);
        assert_eq!(h.device.active_role(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saved_take_round_trips_through_store() {
        let h = harness(None);
        h.store.assign_next_id("abc");
        h.handle.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let take_id = h.handle.stop_recording().await.unwrap();
        assert_eq!(take_id, TakeId::new("abc"));

        let (bytes, duration) = h.store.load(&take_id).await.unwrap().unwrap();
        assert!(!bytes.is_empty());
        assert!((duration - 2.0).abs() <= 0.1);

        let (samples, rate) = crate::playback::decode_wav(&bytes).unwrap();
        assert!((samples.len() as f64 / rate as f64 - duration).abs() < 1e-6);

        let state = h.handle.state();
        assert_eq!(state.phase, Phase::Previewing);
        assert!((state.duration - duration).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_then_forward_clamps_to_duration() {
        let h = harness(None);
        h.handle.start_recording().await.unwrap();
        let state = wait_for_phase(&h.handle, Phase::Previewing).await;

        assert_eq!(h.handle.seek(7.0).await.unwrap(), 7.0);
        let position = h.handle.forward().await.unwrap();
        assert_eq!(position, state.duration.min(17.0));
        assert_eq!(h.handle.state().current_time, position);

        assert_eq!(h.handle.backward().await.unwrap(), position - 10.0);
        assert_eq!(h.handle.seek(-5.0).await.unwrap(), 0.0);
        assert_eq!(h.handle.backward().await.unwrap(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_without_take_is_invalid_state() {
        let h = harness(None);
        assert!(matches!(
            h.handle.delete().await,
            Err(EngineError::InvalidState(_))
        ));
        assert_eq!(h.handle.state().phase, Phase::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_can_be_retried() {
        let h = harness(None);
        h.store.fail_saves(1);
        h.handle.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(matches!(
            h.handle.stop_recording().await,
            Err(EngineError::Storage(_))
        ));
        let state = h.handle.state();
        assert_eq!(state.phase, Phase::SaveFailed);
        assert_eq!(state.error.unwrap().code, "STORAGE_ERROR");
        assert!(!state.is_recording);
        assert_eq!(h.device.active_role(), None);

        let take_id = h.handle.stop_recording().await.unwrap();
        assert!(h.store.contains(&take_id));
        let state = h.handle.state();
        assert_eq!(state.phase, Phase::Previewing);
        assert!(state.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_dismisses_and_failure_keeps_take() {
        let h = harness(None);
        h.handle.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let take_id = h.handle.stop_recording().await.unwrap();

        h.store.fail_deletes(1);
        assert!(matches!(
            h.handle.delete().await,
            Err(EngineError::Storage(_))
        ));
        assert!(h.store.contains(&take_id));
        let state = h.handle.state();
        assert_eq!(state.phase, Phase::Previewing);
        assert_eq!(state.take_id, Some(take_id.clone()));

        let mut events = h.handle.events();
        h.handle.delete().await.unwrap();
        assert!(!h.store.contains(&take_id));
        let state = h.handle.state();
        assert_eq!(state.phase, Phase::Dismissed);
        assert!(state.take_id.is_none());
        assert_eq!(events.recv().await.unwrap(), EngineEvent::Dismissed);

        // A dismissed engine can record again
        h.handle.start_recording().await.unwrap();
        assert_eq!(h.handle.state().phase, Phase::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrub_pauses_and_release_seeks() {
        let h = harness(None);
        h.handle.start_recording().await.unwrap();
        wait_for_phase(&h.handle, Phase::Previewing).await;
        h.handle.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let display = h.handle.scrub(4.0).await.unwrap().unwrap();
        assert_eq!(display.image.unwrap().as_str(), "poster.png");
        let state = h.handle.state();
        assert_eq!(state.phase, Phase::ScrubbingPreview);
        assert!(!state.is_playing);
        assert_eq!(state.current_time, 4.0);

        let display = h.handle.scrub(1.0).await.unwrap().unwrap();
        assert_eq!(display.caption, "Hello");
        assert!(matches!(
            h.handle.play().await,
            Err(EngineError::InvalidState(_))
        ));

        assert_eq!(h.handle.release_scrub().await.unwrap(), 1.0);
        let state = h.handle.state();
        assert_eq!(state.phase, Phase::Previewing);
        assert_eq!(state.current_time, 1.0);
        assert!(!state.is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_plays_to_the_end() {
        let h = harness(None);
        h.handle.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.handle.stop_recording().await.unwrap();

        let mut events = h.handle.events();
        h.handle.play().await.unwrap();
        assert!(h.handle.state().is_playing);
        assert_eq!(h.device.active_role(), Some(DeviceRole::Playback));

        loop {
            if events.recv().await.unwrap() == EngineEvent::PlaybackFinished {
                break;
            }
        }
        let state = h.handle.state();
        assert!(!state.is_playing);
        assert_eq!(state.current_time, 0.0);
        assert_eq!(h.device.active_role(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_with_video_waits_for_readiness() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let video_source = GatedVideoSource::new();
        let handle = Orchestrator::spawn(
            EngineConfig {
                sample_rate: 8_000,
                temp_dir: Some(dir.path().to_path_buf()),
                ..EngineConfig::default()
            },
            EngineParts {
                timeline: script_timeline(),
                store,
                device: AudioSession::new(),
                input: Box::new(|| Box::new(SignalGenerator::silence())),
                audio: Box::new(DecodedAudioPlayer::new()),
                video_source: Arc::new(video_source.clone()),
                video: Some(VideoRef::new("scene.mp4")),
            },
        )
        .unwrap();

        handle.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let state = handle.state();
        assert!(state.is_recording);
        assert!(state.has_video);
        assert!(!state.is_video_ready);
        assert!(!state.is_playing);

        video_source.open();
        let mut states = handle.subscribe();
        states.wait_for(|s| s.is_video_ready).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let state = handle.state();
        assert!(state.is_playing);
        assert!(state.current_time > 0.5);
        assert_eq!(video_source.prepared(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_is_reattached_for_preview() {
        let h = harness(Some("scene.mp4"));
        h.handle.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.handle.stop_recording().await.unwrap();

        let mut states = h.handle.subscribe();
        let state = states.wait_for(|s| s.is_video_ready).await.unwrap().clone();
        assert_eq!(state.phase, Phase::Previewing);
        assert_eq!(h.video_source.prepared(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_device_fails_start() {
        let h = harness(None);
        let _other = h
            .device
            .activate(DeviceRole::Capture, SessionMode::Record)
            .unwrap();

        assert!(matches!(
            h.handle.start_recording().await,
            Err(EngineError::DeviceUnavailable(_))
        ));
        let state = h.handle.state();
        assert_eq!(state.phase, Phase::Uninitialized);
        assert_eq!(state.error.unwrap().code, "DEVICE_UNAVAILABLE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let h = harness(None);
        h.handle.start_recording().await.unwrap();
        assert!(matches!(
            h.handle.start_recording().await,
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            h.handle.seek(3.0).await,
            Err(EngineError::InvalidState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_existing_take() {
        let h = harness(None);
        h.store.insert("earlier", wav_fixture(4.0, 8_000), 4.0);

        let take_id = h.handle.open_take(TakeId::new("earlier")).await.unwrap();
        assert_eq!(take_id.as_str(), "earlier");
        let state = h.handle.state();
        assert_eq!(state.phase, Phase::Previewing);
        assert!((state.duration - 4.0).abs() < 1e-9);
        assert_eq!(h.handle.waveform(5).await.unwrap().unwrap().len(), 20);

        assert!(matches!(
            h.handle.open_take(TakeId::new("missing")).await,
            Err(EngineError::PreviewUnavailable { .. })
        ));
        let state = h.handle.state();
        assert_eq!(state.take_id, Some(TakeId::new("missing")));
        assert_eq!(state.error.unwrap().code, "PREVIEW_UNAVAILABLE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_controls_are_rejected_while_a_take_loads() {
        let h = harness(None);
        h.store.insert("a", wav_fixture(4.0, 8_000), 4.0);
        h.store.insert("b", wav_fixture(6.0, 8_000), 6.0);
        h.handle.open_take(TakeId::new("a")).await.unwrap();

        h.store.delay_loads(Duration::from_secs(1));
        let opening = {
            let handle = h.handle.clone();
            tokio::spawn(async move { handle.open_take(TakeId::new("b")).await })
        };

        let state = wait_for_phase(&h.handle, Phase::LoadingTake).await;
        assert_eq!(state.take_id, Some(TakeId::new("b")));
        assert!(!state.is_playing);
        assert!(matches!(
            h.handle.play().await,
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            h.handle.seek(3.0).await,
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            h.handle.scrub(3.0).await,
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            h.handle.open_take(TakeId::new("a")).await,
            Err(EngineError::InvalidState(_))
        ));

        assert_eq!(opening.await.unwrap().unwrap(), TakeId::new("b"));
        let state = h.handle.state();
        assert_eq!(state.phase, Phase::Previewing);
        assert!((state.duration - 6.0).abs() < 1e-9);
        assert_eq!(h.handle.seek(3.0).await.unwrap(), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_video_keeps_preview_playable() {
        let h = harness(Some("broken.mp4"));
        h.video_source.fail_prepares();
        h.store.insert("earlier", wav_fixture(4.0, 8_000), 4.0);

        let mut events = h.handle.events();
        h.handle.open_take(TakeId::new("earlier")).await.unwrap();
        let code = loop {
            if let EngineEvent::Error(response) = events.recv().await.unwrap() {
                break response.code;
            }
        };
        assert_eq!(code, "DECODE_ERROR");

        let state = h.handle.state();
        assert_eq!(state.phase, Phase::Previewing);
        assert!(!state.has_video);
        assert!(!state.is_video_ready);
        assert_eq!(state.error.unwrap().code, "DECODE_ERROR");

        h.handle.play().await.unwrap();
        assert!(h.handle.state().is_playing);
        assert_eq!(h.device.active_mode(), Some(SessionMode::Playback));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_continues_when_video_fails() {
        let h = harness(Some("broken.mp4"));
        h.video_source.fail_prepares();

        h.handle.start_recording().await.unwrap();
        let mut states = h.handle.subscribe();
        let state = states
            .wait_for(|s| s.error.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(state.error.unwrap().code, "DECODE_ERROR");
        assert!(state.is_recording);
        assert!(state.is_playing);
        assert!(!state.has_video);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.handle.state().current_time >= 0.9);
        h.handle.stop_recording().await.unwrap();
        assert_eq!(h.handle.state().phase, Phase::Previewing);
    }

    #[tokio::test]
    async fn test_zero_tick_interval_is_rejected() {
        let result = Orchestrator::spawn(
            EngineConfig {
                tick_interval_ms: 0,
                ..EngineConfig::default()
            },
            EngineParts {
                timeline: script_timeline(),
                store: Arc::new(MemoryStore::new()),
                device: AudioSession::new(),
                input: Box::new(|| Box::new(SignalGenerator::default())),
                audio: Box::new(DecodedAudioPlayer::new()),
                video_source: Arc::new(GatedVideoSource::ready()),
                video: None,
            },
        );

        match result {
            Err(EngineError::InvalidConfig(message)) => {
                assert!(message.contains("tickIntervalMs"))
            }
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("zero tick interval was accepted"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_the_handle() {
        let h = harness(None);
        h.handle.start_recording().await.unwrap();
        h.handle.shutdown().await.unwrap();

        assert_eq!(h.device.active_role(), None);
        assert!(matches!(
            h.handle.play().await,
            Err(EngineError::ControlTaskClosed)
        ));
    }
}
