//! Capture state machine.
//!
//! [`CaptureController`] owns the active camera together with everything a save needs:
//! filename state, metadata, display settings and the background frame. The UI mutates
//! that state directly and calls [`CaptureController::tick`] periodically. Each tick
//! 1. fetches the newest frame and renders the preview,
//! 2. advances the active save trigger, if any,
//! 3. polls background series compressions.
//!
//! The view is either `Live` or `Frozen`; independently at most one save trigger is
//! active. Starting a second trigger, reconfiguring, or switching cameras while a
//! trigger runs fails with [`AppError::CaptureBusy`].

use crate::camera::{Camera, CameraConfig, Frame};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult, CameraError};
use crate::metadata::Metadata;
use crate::naming::{sidecar_path, FilenameState};
use crate::persistence::{self, CompressionHandle};
use crate::pipeline::{self, Background, DisplayImage, DisplaySettings};
use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Whether new frames are being acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Live,
    Frozen,
}

/// The save operation in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SaveTrigger {
    Idle,
    /// Write the displayed frame on the next tick
    Single,
    /// Bounded sequence capture into the camera buffer, written when complete
    FastSeries { frames: usize, started: Instant },
    /// One displayed frame every `interval`
    SlowSeries {
        frames: usize,
        interval: Duration,
        started: Instant,
        saved: usize,
    },
    /// Write the whole rolling buffer, oldest first
    BufferDump,
}

impl SaveTrigger {
    pub fn is_idle(&self) -> bool {
        matches!(self, SaveTrigger::Idle)
    }
}

/// Something the UI should tell the user about.
#[derive(Debug)]
pub enum CaptureEvent {
    /// A single image (or slow-series frame) was written
    ImageSaved(PathBuf),
    /// A series thumbnail and container were written; compression is running
    SeriesSaved { thumbnail: PathBuf, frames: usize },
    /// Background compression produced the stack
    SeriesCompressed(PathBuf),
    /// A save failed. Frames are held for [`CaptureController::retry_save`]
    SaveFailed(AppError),
    /// The image was written but its metadata sidecar was not
    MetadataFailed { image: PathBuf, error: AppError },
    /// The fast series did not finish in time and was cancelled
    SeriesTimedOut(Duration),
    /// The camera could not deliver a frame
    CameraFailed(CameraError),
}

/// Outcome of one tick.
#[derive(Debug)]
pub struct TickReport {
    /// Preview of the newest frame
    pub display: Option<DisplayImage>,
    /// Current 1-based buffer position
    pub frame_number: usize,
    /// Brightest raw sample of the newest frame
    pub max_pixel: u16,
    pub events: Vec<CaptureEvent>,
}

#[derive(Debug, Clone)]
enum HeldSave {
    Single(Frame),
    Series(Vec<Frame>),
}

/// Coordinates camera, preview and saving.
pub struct CaptureController {
    camera: Box<dyn Camera>,
    mode: ViewMode,
    trigger: SaveTrigger,
    /// Output path state
    pub naming: FilenameState,
    /// Metadata written with every image
    pub metadata: Metadata,
    /// Preview controls
    pub display: DisplaySettings,
    /// Write a YAML sidecar next to every image and series
    pub save_sidecar: bool,
    background: Option<Background>,
    buffer_depth: usize,
    sequence_timeout: Duration,
    preview_size: u32,
    compressions: Vec<CompressionHandle>,
    held: Option<HeldSave>,
    last_frame: Option<Frame>,
    /// Raised outside a tick, reported by the next one
    pending_events: Vec<CaptureEvent>,
}

impl CaptureController {
    /// Take ownership of an opened camera and start live capture.
    pub fn new(camera: Box<dyn Camera>, config: &AppConfig) -> Self {
        let mut controller = Self {
            camera,
            mode: ViewMode::Frozen,
            trigger: SaveTrigger::Idle,
            naming: FilenameState::from_settings(&config.saving),
            metadata: Metadata::default(),
            display: DisplaySettings::default(),
            save_sidecar: config.saving.save_metadata_sidecar,
            background: None,
            buffer_depth: config.camera.buffer_depth.max(1),
            sequence_timeout: config.capture.sequence_timeout,
            preview_size: config.capture.preview_size,
            compressions: Vec::new(),
            held: None,
            last_frame: None,
            pending_events: Vec::new(),
        };
        if let Err(err) = controller.set_live(true) {
            warn!(error = %err, "Could not start live capture");
        }
        controller
    }

    pub fn camera(&self) -> &dyn Camera {
        self.camera.as_ref()
    }

    pub fn camera_mut(&mut self) -> &mut dyn Camera {
        self.camera.as_mut()
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn trigger(&self) -> SaveTrigger {
        self.trigger
    }

    /// Most recent frame shown in the preview.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    /// Whether a failed save is waiting for [`Self::retry_save`].
    pub fn has_held_save(&self) -> bool {
        self.held.is_some()
    }

    /// Series compressions still running.
    pub fn pending_compressions(&self) -> usize {
        self.compressions.len()
    }

    pub fn buffer_depth(&self) -> usize {
        self.buffer_depth
    }

    /// Rolling buffer size used the next time live capture starts.
    pub fn set_buffer_depth(&mut self, depth: usize) -> AppResult<()> {
        if depth == 0 {
            return Err(AppError::InvalidInput("buffer depth must be at least 1".into()));
        }
        self.buffer_depth = depth;
        if self.mode == ViewMode::Live && self.trigger.is_idle() {
            self.camera.start_continuous_capture(depth)?;
        }
        Ok(())
    }

    fn busy_with_capture(&self) -> bool {
        matches!(
            self.trigger,
            SaveTrigger::FastSeries { .. } | SaveTrigger::BufferDump
        )
    }

    fn require_idle(&self) -> AppResult<()> {
        if self.trigger.is_idle() {
            Ok(())
        } else {
            Err(AppError::CaptureBusy)
        }
    }

    /// Switch between live acquisition and a frozen view.
    pub fn set_live(&mut self, live: bool) -> AppResult<()> {
        if self.busy_with_capture() {
            return Err(AppError::CaptureBusy);
        }
        if live {
            self.camera.start_continuous_capture(self.buffer_depth)?;
            self.mode = ViewMode::Live;
        } else {
            self.camera.stop_live_capture()?;
            self.mode = ViewMode::Frozen;
        }
        info!(mode = ?self.mode, "View mode changed");
        Ok(())
    }

    /// Save the displayed frame on the next tick.
    pub fn request_save(&mut self) -> AppResult<()> {
        self.require_idle()?;
        self.trigger = SaveTrigger::Single;
        Ok(())
    }

    /// Capture `frames` frames as fast as the camera allows and save them as a series.
    pub fn start_fast_series(&mut self, frames: usize, now: Instant) -> AppResult<()> {
        self.require_idle()?;
        if frames == 0 {
            return Err(AppError::InvalidInput("a series needs at least one frame".into()));
        }
        if !self.camera.supports_sequence_capture() {
            return Err(CameraError::Unsupported("sequence capture").into());
        }
        self.camera.start_sequence_capture(frames)?;
        self.mode = ViewMode::Live;
        self.trigger = SaveTrigger::FastSeries {
            frames,
            started: now,
        };
        info!(frames, camera = self.camera.name(), "Fast series started");
        Ok(())
    }

    /// Save one displayed frame every `interval` until `frames` have been written.
    pub fn start_slow_series(
        &mut self,
        frames: usize,
        interval: Duration,
        now: Instant,
    ) -> AppResult<()> {
        self.require_idle()?;
        if frames == 0 {
            return Err(AppError::InvalidInput("a series needs at least one frame".into()));
        }
        if !self.naming.names_are_unique_per_frame() {
            return Err(AppError::InvalidInput(
                "a slow series needs the image counter or the time in the filename".into(),
            ));
        }
        if self.mode == ViewMode::Frozen {
            self.set_live(true)?;
        }
        self.naming.begin_series()?;
        self.trigger = SaveTrigger::SlowSeries {
            frames,
            interval,
            started: now,
            saved: 0,
        };
        info!(frames, interval = ?interval, "Slow series started");
        Ok(())
    }

    /// Freeze, write the whole rolling buffer on the next tick, then go live again.
    pub fn start_buffer_dump(&mut self) -> AppResult<()> {
        self.require_idle()?;
        self.trigger = SaveTrigger::BufferDump;
        Ok(())
    }

    /// Abort the active trigger. Frames already written stay on disk.
    pub fn cancel(&mut self) {
        match std::mem::replace(&mut self.trigger, SaveTrigger::Idle) {
            SaveTrigger::Idle => return,
            SaveTrigger::FastSeries { .. } => self.restore_live(),
            SaveTrigger::SlowSeries { saved, .. } if saved > 0 => self.finish_slow_series(),
            _ => {}
        }
        info!("Capture cancelled");
    }

    /// Apply new camera settings. Rejected while a trigger is active.
    pub fn reconfigure(&mut self, config: &CameraConfig) -> AppResult<()> {
        self.require_idle()?;
        self.camera.reconfigure(config)?;
        info!(config = ?self.camera.config(), "Camera reconfigured");
        self.restore_view();
        Ok(())
    }

    /// Replace the camera. Rejected while a trigger is active.
    pub fn switch_camera(&mut self, camera: Box<dyn Camera>) -> AppResult<()> {
        self.require_idle()?;
        self.camera.close();
        self.camera = camera;
        self.last_frame = None;
        info!(camera = self.camera.name(), "Camera switched");
        self.restore_view();
        Ok(())
    }

    /// Replace the background with the displayed frame.
    pub fn capture_background(&mut self) -> AppResult<()> {
        let frame = self
            .last_frame
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("no frame to use as background".into()))?;
        self.background = Some(Background::from_frame(frame));
        Ok(())
    }

    /// Replace the background with an image file.
    pub fn load_background(&mut self, path: &Path) -> AppResult<()> {
        self.background = Some(Background::load(path)?);
        Ok(())
    }

    pub fn background(&self) -> Option<&Background> {
        self.background.as_ref()
    }

    /// Write the metadata sidecar for the next image path on its own.
    pub fn save_metadata_now(&self) -> AppResult<PathBuf> {
        let path = sidecar_path(&self.naming.path(stamp()));
        persistence::save_metadata(&path, &self.metadata)?;
        Ok(path)
    }

    /// Write the frames of the last failed save with the current filename settings.
    pub fn retry_save(&mut self) -> AppResult<PathBuf> {
        let held = self
            .held
            .take()
            .ok_or_else(|| AppError::InvalidInput("no failed save to retry".into()))?;
        let result = match &held {
            HeldSave::Single(frame) => self.write_single(frame),
            HeldSave::Series(frames) => self.write_series(frames).map(|(path, _)| path),
        };
        if result.is_err() {
            self.held = Some(held);
        }
        result
    }

    /// Advance the controller. See the module docs for the order of work.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut events = Vec::new();

        let frame = match self.camera.get_image(None) {
            Ok(frame) => Some(frame),
            Err(err) => {
                debug!(error = %err, "No frame this tick");
                events.push(CaptureEvent::CameraFailed(err));
                None
            }
        };
        let display = frame.as_ref().map(|f| {
            pipeline::render(f, &self.display, self.background.as_ref(), self.preview_size)
        });
        let max_pixel = display.as_ref().map_or(0, |d| d.max_pixel);
        if let Some(frame) = frame {
            self.last_frame = Some(frame);
        }

        self.advance_trigger(now, &mut events);
        self.poll_compressions(&mut events);
        events.append(&mut self.pending_events);

        TickReport {
            display,
            frame_number: self.camera.get_frame_number(),
            max_pixel,
            events,
        }
    }

    fn advance_trigger(&mut self, now: Instant, events: &mut Vec<CaptureEvent>) {
        match self.trigger {
            SaveTrigger::Idle => {}
            SaveTrigger::Single => {
                self.trigger = SaveTrigger::Idle;
                match self.last_frame.clone() {
                    Some(frame) => self.save_single(frame, events),
                    None => {
                        warn!("Save requested before any frame arrived");
                        events.push(CaptureEvent::SaveFailed(AppError::InvalidInput(
                            "no frame to save".into(),
                        )));
                    }
                }
            }
            SaveTrigger::FastSeries { frames, started } => {
                if self.camera.finished_live_sequence() {
                    self.finish_fast_series(frames, events);
                } else if now.saturating_duration_since(started) > self.sequence_timeout {
                    warn!(frames, timeout = ?self.sequence_timeout, "Fast series timed out");
                    self.trigger = SaveTrigger::Idle;
                    self.restore_live();
                    events.push(CaptureEvent::SeriesTimedOut(self.sequence_timeout));
                }
            }
            SaveTrigger::SlowSeries {
                frames,
                interval,
                started,
                saved,
            } => {
                let due = interval.saturating_mul(saved.try_into().unwrap_or(u32::MAX));
                if now.saturating_duration_since(started) < due {
                    return;
                }
                let Some(frame) = self.last_frame.clone() else {
                    return;
                };
                match self.write_single_in_series(&frame) {
                    Ok(path) => {
                        events.push(CaptureEvent::ImageSaved(path));
                        let saved = saved + 1;
                        if saved >= frames {
                            self.finish_slow_series();
                            self.trigger = SaveTrigger::Idle;
                            info!(frames, "Slow series complete");
                        } else {
                            self.trigger = SaveTrigger::SlowSeries {
                                frames,
                                interval,
                                started,
                                saved,
                            };
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, saved, "Slow series stopped");
                        if saved > 0 {
                            self.finish_slow_series();
                        }
                        self.trigger = SaveTrigger::Idle;
                        self.held = Some(HeldSave::Single(frame));
                        events.push(CaptureEvent::SaveFailed(err));
                    }
                }
            }
            SaveTrigger::BufferDump => {
                self.trigger = SaveTrigger::Idle;
                self.dump_buffer(events);
            }
        }
    }

    fn finish_slow_series(&mut self) {
        if let Err(err) = self.naming.advance_after_slow_series() {
            warn!(error = %err, "Slow series left the directory counter unchanged");
        }
    }

    fn save_single(&mut self, frame: Frame, events: &mut Vec<CaptureEvent>) {
        match self.write_single(&frame) {
            Ok(path) => events.push(CaptureEvent::ImageSaved(path)),
            Err(err) => {
                warn!(error = %err, "Save failed, frame kept for retry");
                self.held = Some(HeldSave::Single(frame));
                events.push(CaptureEvent::SaveFailed(err));
            }
        }
    }

    fn finish_fast_series(&mut self, frames: usize, events: &mut Vec<CaptureEvent>) {
        self.trigger = SaveTrigger::Idle;
        if let Err(err) = self.camera.stop_live_capture() {
            warn!(error = %err, "Could not stop sequence capture");
        }
        let collected: Result<Vec<Frame>, CameraError> =
            (1..=frames).map(|i| self.camera.get_image(Some(i))).collect();
        match collected {
            Ok(collected) => self.save_series(collected, events),
            Err(err) => events.push(CaptureEvent::SaveFailed(err.into())),
        }
        self.restore_live();
    }

    fn dump_buffer(&mut self, events: &mut Vec<CaptureEvent>) {
        if let Err(err) = self.camera.stop_live_capture() {
            warn!(error = %err, "Could not freeze for buffer dump");
        }
        let order = self.camera.buffer_status().chronological_indices();
        debug!(frames = order.len(), "Dumping rolling buffer");
        let collected: Result<Vec<Frame>, CameraError> = order
            .into_iter()
            .map(|i| self.camera.get_image(Some(i)))
            .collect();
        match collected {
            Ok(frames) if frames.is_empty() => events.push(CaptureEvent::SaveFailed(
                AppError::InvalidInput("the rolling buffer is empty".into()),
            )),
            Ok(frames) => self.save_series(frames, events),
            Err(err) => events.push(CaptureEvent::SaveFailed(err.into())),
        }
        self.restore_live();
    }

    fn save_series(&mut self, frames: Vec<Frame>, events: &mut Vec<CaptureEvent>) {
        match self.write_series(&frames) {
            Ok((thumbnail, count)) => events.push(CaptureEvent::SeriesSaved {
                thumbnail,
                frames: count,
            }),
            Err(err) => {
                warn!(error = %err, frames = frames.len(), "Series save failed, frames kept for retry");
                self.held = Some(HeldSave::Series(frames));
                events.push(CaptureEvent::SaveFailed(err));
            }
        }
    }

    fn write_single(&mut self, frame: &Frame) -> AppResult<PathBuf> {
        self.write_image(frame, FilenameState::advance_after_single)
    }

    fn write_single_in_series(&mut self, frame: &Frame) -> AppResult<PathBuf> {
        self.write_image(frame, FilenameState::advance_within_series)
    }

    /// Counters move only once the image is on disk, and nothing is written when they
    /// cannot move.
    fn write_image(
        &mut self,
        frame: &Frame,
        advance: fn(&mut FilenameState) -> AppResult<()>,
    ) -> AppResult<PathBuf> {
        let path = self.naming.path(stamp());
        let mut next = self.naming.clone();
        advance(&mut next)?;
        self.check_sidecar_free(&path)?;
        persistence::save_image(&path, frame, &self.metadata)?;
        self.naming = next;
        self.write_sidecar(&path);
        Ok(path)
    }

    fn write_series(&mut self, frames: &[Frame]) -> AppResult<(PathBuf, usize)> {
        let mut naming = self.naming.clone();
        naming.begin_series()?;
        let path = naming.path(stamp());
        naming.advance_after_series()?;
        self.check_sidecar_free(&path)?;
        let handle = persistence::save_series(&path, frames, &self.metadata)?;
        self.compressions.push(handle);
        self.naming = naming;
        info!(thumbnail = %path.display(), frames = frames.len(), "Series saved");
        self.write_sidecar(&path);
        Ok((path, frames.len()))
    }

    /// A failed sidecar does not undo the image it describes.
    fn write_sidecar(&mut self, image: &Path) {
        if !self.save_sidecar {
            return;
        }
        if let Err(error) = persistence::save_metadata(&sidecar_path(image), &self.metadata) {
            warn!(error = %error, image = %image.display(), "Metadata sidecar not written");
            self.pending_events.push(CaptureEvent::MetadataFailed {
                image: image.to_path_buf(),
                error,
            });
        }
    }

    fn check_sidecar_free(&self, image: &Path) -> AppResult<()> {
        let sidecar = sidecar_path(image);
        if self.save_sidecar && sidecar.exists() {
            return Err(AppError::FilenameCollision(sidecar));
        }
        Ok(())
    }

    fn poll_compressions(&mut self, events: &mut Vec<CaptureEvent>) {
        let mut still_running = Vec::with_capacity(self.compressions.len());
        for mut handle in self.compressions.drain(..) {
            match handle.try_result() {
                None => still_running.push(handle),
                Some(Ok(path)) => events.push(CaptureEvent::SeriesCompressed(path)),
                Some(Err(err)) => events.push(CaptureEvent::SaveFailed(err)),
            }
        }
        self.compressions = still_running;
    }

    /// Block until every background compression has finished.
    pub fn wait_for_compressions(&mut self) -> Vec<AppResult<PathBuf>> {
        self.compressions.drain(..).map(CompressionHandle::wait).collect()
    }

    fn restore_live(&mut self) {
        match self.camera.start_continuous_capture(self.buffer_depth) {
            Ok(()) => self.mode = ViewMode::Live,
            Err(err) => {
                warn!(error = %err, "Could not restore live capture");
                self.mode = ViewMode::Frozen;
            }
        }
    }

    fn restore_view(&mut self) {
        if self.mode == ViewMode::Live {
            self.restore_live();
        }
    }
}

fn stamp() -> NaiveDateTime {
    Local::now().naive_local()
}
