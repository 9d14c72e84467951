//! The eframe/egui implementation for the GUI.
//!
//! The window mirrors the controller state: every widget edits a field of
//! [`CaptureController`] (or a form that is applied to it), and `update` runs one
//! controller tick whenever the configured tick period has elapsed.

use crate::camera::{self, CameraBackend, CameraConfig, SUPPORTED_BIT_DEPTHS};
use crate::capture::{CaptureController, CaptureEvent, SaveTrigger, ViewMode};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::metadata::{compose_choice, TubeMagnification, OTHER_CHOICE};
use crate::naming::{format_counter, parse_counter, DIR_COUNTER_WIDTH, IMAGE_COUNTER_WIDTH, SUPPORTED_EXTENSIONS};
use eframe::egui;
use std::time::{Duration, Instant};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    ImageCapture,
    Camera,
    Saving,
    Metadata,
    Roi,
}

impl Tab {
    const ALL: [(Tab, &'static str); 5] = [
        (Tab::ImageCapture, "Image Capture"),
        (Tab::Camera, "Camera"),
        (Tab::Saving, "Saving"),
        (Tab::Metadata, "Meta Data"),
        (Tab::Roi, "ROI"),
    ];
}

/// A preset list plus the free text used for "Other:" and collar-style entries.
struct Choice {
    presets: Vec<String>,
    selected: String,
    detail: String,
}

impl Choice {
    fn new(mut presets: Vec<String>) -> Self {
        if !presets.iter().any(|p| p == OTHER_CHOICE) {
            presets.push(OTHER_CHOICE.to_string());
        }
        let selected = presets.first().cloned().unwrap_or_default();
        Self {
            presets,
            selected,
            detail: String::new(),
        }
    }

    fn value(&self) -> String {
        compose_choice(&self.selected, &self.detail)
    }

    fn show(&mut self, ui: &mut egui::Ui, label: &str) {
        ui.horizontal(|ui| {
            egui::ComboBox::from_label(label)
                .selected_text(self.selected.clone())
                .show_ui(ui, |ui| {
                    for preset in &self.presets {
                        ui.selectable_value(&mut self.selected, preset.clone(), preset);
                    }
                });
            if self.selected.ends_with(':') {
                ui.text_edit_singleline(&mut self.detail);
            }
        });
    }
}

/// Camera settings as edited in the Camera and ROI tabs, applied on request.
struct CameraForm {
    backend: CameraBackend,
    config: CameraConfig,
    buffer_depth: usize,
}

/// The main GUI struct.
pub struct CameraApp {
    controller: CaptureController,
    config: AppConfig,
    tab: Tab,
    texture: Option<egui::TextureHandle>,
    last_tick: Option<Instant>,
    frame_number: usize,
    max_pixel: u16,
    status: Option<(String, bool)>,
    path_label: String,
    image_counter_text: String,
    dir_counter_text: String,
    fast_frames: usize,
    slow_frames: usize,
    slow_interval_s: f64,
    microscope: Choice,
    light: Choice,
    objective: Choice,
    camera_form: CameraForm,
    stage_output: f64,
    stage_step: f64,
}

impl CameraApp {
    /// Creates a new GUI around an already connected controller.
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        controller: CaptureController,
        config: AppConfig,
        backend: CameraBackend,
    ) -> Self {
        let camera_form = CameraForm {
            backend,
            config: controller.camera().config().clone(),
            buffer_depth: controller.buffer_depth(),
        };
        let image_counter_text =
            format_counter(controller.naming.image_counter.value, IMAGE_COUNTER_WIDTH);
        let dir_counter_text = format_counter(controller.naming.dir_counter.value, DIR_COUNTER_WIDTH);
        Self {
            microscope: Choice::new(config.metadata.microscopes.clone()),
            light: Choice::new(config.metadata.light_sources.clone()),
            objective: Choice::new(config.metadata.objectives.clone()),
            fast_frames: config.capture.fast_series_frames,
            slow_frames: config.capture.slow_series_frames,
            slow_interval_s: config.capture.slow_series_interval.as_secs_f64(),
            controller,
            config,
            tab: Tab::ImageCapture,
            texture: None,
            last_tick: None,
            frame_number: 0,
            max_pixel: 0,
            status: None,
            path_label: String::new(),
            image_counter_text,
            dir_counter_text,
            camera_form,
            stage_output: 0.0,
            stage_step: 1.0,
        }
    }

    fn report(&mut self, result: Result<(), AppError>) {
        if let Err(err) = result {
            warn!(error = %err, recoverable = err.can_recover(), "Operation failed");
            self.status = Some((err.to_string(), true));
        }
    }

    fn info(&mut self, text: String) {
        self.status = Some((text, false));
    }

    fn tick(&mut self, ctx: &egui::Context) {
        let now = Instant::now();
        if self
            .last_tick
            .is_some_and(|t| now.duration_since(t) < self.config.tick())
        {
            return;
        }
        self.last_tick = Some(now);

        let report = self.controller.tick(now);
        self.frame_number = report.frame_number;
        self.max_pixel = report.max_pixel;
        if let Some(display) = report.display {
            let size = [display.width as usize, display.height as usize];
            let image = egui::ColorImage::from_rgba_unmultiplied(size, &display.rgba);
            if let Some(texture) = &mut self.texture {
                texture.set(image, egui::TextureOptions::NEAREST);
            } else {
                self.texture =
                    Some(ctx.load_texture("camera_frame", image, egui::TextureOptions::NEAREST));
            }
            if self.controller.display.autoscale {
                self.controller.display.min = display.min;
                self.controller.display.max = display.max;
            }
        }
        for event in report.events {
            self.handle_event(event);
        }
        self.sync_counter_text();
        self.path_label = self
            .controller
            .naming
            .preview(chrono::Local::now().naive_local())
            .label();
    }

    fn handle_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::ImageSaved(path) => self.info(format!("Saved {}", path.display())),
            CaptureEvent::SeriesSaved { thumbnail, frames } => {
                self.info(format!("Saved {frames} frames as {}", thumbnail.display()))
            }
            CaptureEvent::SeriesCompressed(path) => {
                self.info(format!("Compressed {}", path.display()))
            }
            CaptureEvent::SaveFailed(err) => {
                let hint = if self.controller.has_held_save() {
                    " (fix the settings and press Retry)"
                } else {
                    ""
                };
                self.status = Some((format!("{err}{hint}"), true));
            }
            CaptureEvent::MetadataFailed { image, error } => {
                self.status = Some((
                    format!("Saved {} but not its metadata: {error}", image.display()),
                    true,
                ))
            }
            CaptureEvent::SeriesTimedOut(after) => {
                self.status = Some((format!("Time series did not finish within {after:?}"), true))
            }
            CaptureEvent::CameraFailed(err) => self.status = Some((err.to_string(), true)),
        }
    }

    fn sync_counter_text(&mut self) {
        let naming = &self.controller.naming;
        self.image_counter_text = format_counter(naming.image_counter.value, IMAGE_COUNTER_WIDTH);
        self.dir_counter_text = format_counter(naming.dir_counter.value, DIR_COUNTER_WIDTH);
    }

    fn image_capture_tab(&mut self, ui: &mut egui::Ui) {
        let busy = !self.controller.trigger().is_idle();
        ui.horizontal(|ui| {
            let live = self.controller.mode() == ViewMode::Live;
            let label = if live { "Freeze" } else { "Live" };
            if ui.button(label).clicked() {
                let result = self.controller.set_live(!live);
                self.report(result);
            }
            if ui.add_enabled(!busy, egui::Button::new("Save")).clicked() {
                let result = self.controller.request_save();
                self.report(result);
            }
            if ui.add_enabled(!busy, egui::Button::new("Save buffer")).clicked() {
                let result = self.controller.start_buffer_dump();
                self.report(result);
            }
            if ui.button("Save metadata").clicked() {
                let result = self.controller.save_metadata_now().map(|path| {
                    self.info(format!("Saved {}", path.display()));
                });
                self.report(result);
            }
            if self.controller.has_held_save() && ui.button("Retry").clicked() {
                let result = self.controller.retry_save().map(|path| {
                    self.info(format!("Saved {}", path.display()));
                });
                self.sync_counter_text();
                self.report(result);
            }
        });

        ui.separator();
        ui.horizontal(|ui| {
            ui.label("Frames");
            ui.add(egui::DragValue::new(&mut self.fast_frames).range(1..=100_000));
            if ui.add_enabled(!busy, egui::Button::new("Time series")).clicked() {
                let result = self.controller.start_fast_series(self.fast_frames, Instant::now());
                self.report(result);
            }
        });
        ui.horizontal(|ui| {
            ui.label("Frames");
            ui.add(egui::DragValue::new(&mut self.slow_frames).range(1..=100_000));
            ui.label("every");
            ui.add(
                egui::DragValue::new(&mut self.slow_interval_s)
                    .range(0.0..=86_400.0)
                    .suffix(" s"),
            );
            if ui.add_enabled(!busy, egui::Button::new("Slow series")).clicked() {
                let interval = Duration::from_secs_f64(self.slow_interval_s);
                let result =
                    self.controller
                        .start_slow_series(self.slow_frames, interval, Instant::now());
                self.report(result);
            }
        });
        if busy {
            ui.horizontal(|ui| {
                let what = match self.controller.trigger() {
                    SaveTrigger::FastSeries { frames, .. } => format!("Capturing {frames} frames"),
                    SaveTrigger::SlowSeries { frames, saved, .. } => {
                        format!("Slow series {saved}/{frames}")
                    }
                    _ => "Saving".to_string(),
                };
                ui.spinner();
                ui.label(what);
                if ui.button("Cancel").clicked() {
                    self.controller.cancel();
                }
            });
        }

        ui.separator();
        let display = &mut self.controller.display;
        ui.checkbox(&mut display.autoscale, "Autoscale");
        ui.add_enabled_ui(!display.autoscale, |ui| {
            ui.horizontal(|ui| {
                ui.label("Min");
                ui.add(egui::DragValue::new(&mut display.min));
                ui.label("Max");
                ui.add(egui::DragValue::new(&mut display.max));
            });
        });
        ui.horizontal(|ui| {
            ui.checkbox(&mut self.controller.display.background_enabled, "Apply background");
            if ui.button("Use current frame").clicked() {
                let result = self.controller.capture_background();
                self.report(result);
            }
            if ui.button("Load…").clicked() {
                if let Some(path) = rfd::FileDialog::new()
                    .add_filter("Images", &["tif", "tiff", "png"])
                    .pick_file()
                {
                    let result = self.controller.load_background(&path);
                    self.report(result);
                }
            }
        });

        if let Some(stage) = self.controller.camera_mut().focus_stage() {
            ui.separator();
            let mut changed_output = false;
            let mut changed_step = false;
            ui.horizontal(|ui| {
                changed_output = ui
                    .add(egui::Slider::new(&mut self.stage_output, 0.0..=100.0).text("Piezo %"))
                    .changed();
                changed_step = ui
                    .add(egui::DragValue::new(&mut self.stage_step).range(0.0..=100.0).prefix("step "))
                    .changed();
            });
            let mut result = Ok(());
            if changed_output {
                result = stage.set_output_percent(self.stage_output);
            }
            if changed_step {
                result = result.and(stage.set_step_percent(self.stage_step));
            }
            if let Err(err) = result {
                error!(error = %err, "Focus stage command failed");
                self.status = Some((err.to_string(), true));
            }
        }
    }

    fn camera_tab(&mut self, ui: &mut egui::Ui) {
        let form = &mut self.camera_form;
        egui::ComboBox::from_label("Camera")
            .selected_text(form.backend.label())
            .show_ui(ui, |ui| {
                for backend in CameraBackend::ALL {
                    ui.selectable_value(&mut form.backend, backend, backend.label());
                }
            });
        egui::ComboBox::from_label("Bit depth")
            .selected_text(form.config.bit_depth.to_string())
            .show_ui(ui, |ui| {
                for depth in SUPPORTED_BIT_DEPTHS {
                    ui.selectable_value(&mut form.config.bit_depth, depth, depth.to_string());
                }
            });
        ui.horizontal(|ui| {
            ui.label("Exposure");
            ui.add(egui::DragValue::new(&mut form.config.exposure_ms).range(0.0..=60_000.0).suffix(" ms"));
            ui.label("Frame time");
            ui.add(egui::DragValue::new(&mut form.config.frame_time_ms).range(0.0..=60_000.0).suffix(" ms"));
        });
        ui.horizontal(|ui| {
            ui.label("Buffer depth");
            ui.add(egui::DragValue::new(&mut form.buffer_depth).range(1..=100_000));
        });

        ui.horizontal(|ui| {
            if ui.button("Apply").clicked() {
                self.apply_camera_form();
            }
            if ui.button("Connect").clicked() {
                self.switch_backend();
            }
        });

        let actual = self.controller.camera().config();
        ui.label(format!(
            "{}: {} bit, {}x{} at ({}, {}), exposure {:.3} ms, frame time {:.3} ms",
            self.controller.camera().name(),
            actual.bit_depth,
            actual.roi_shape.0,
            actual.roi_shape.1,
            actual.roi_pos.0,
            actual.roi_pos.1,
            actual.exposure_ms,
            actual.frame_time_ms,
        ));
    }

    fn roi_tab(&mut self, ui: &mut egui::Ui) {
        let roi = &mut self.camera_form.config;
        egui::Grid::new("roi_grid").show(ui, |ui| {
            ui.label("Width");
            ui.add(egui::DragValue::new(&mut roi.roi_shape.0).range(1..=16_384));
            ui.label("Height");
            ui.add(egui::DragValue::new(&mut roi.roi_shape.1).range(1..=16_384));
            ui.end_row();
            ui.label("X");
            ui.add(egui::DragValue::new(&mut roi.roi_pos.0));
            ui.label("Y");
            ui.add(egui::DragValue::new(&mut roi.roi_pos.1));
            ui.end_row();
        });
        if ui.button("Apply ROI").clicked() {
            self.apply_camera_form();
        }
    }

    fn apply_camera_form(&mut self) {
        let config = self.camera_form.config.clone();
        let result = self
            .controller
            .reconfigure(&config)
            .and_then(|()| self.controller.set_buffer_depth(self.camera_form.buffer_depth));
        self.report(result);
        self.camera_form.config = self.controller.camera().config().clone();
    }

    fn switch_backend(&mut self) {
        if !self.controller.trigger().is_idle() {
            self.report(Err(AppError::CaptureBusy));
            return;
        }
        let mut settings = self.config.camera.clone();
        let form = &self.camera_form;
        settings.bit_depth = form.config.bit_depth;
        (settings.roi_width, settings.roi_height) = form.config.roi_shape;
        (settings.roi_x, settings.roi_y) = form.config.roi_pos;
        settings.exposure_ms = form.config.exposure_ms;
        settings.frame_time_ms = form.config.frame_time_ms;

        let (cam, fallback) = camera::connect(form.backend, &settings);
        let result = self.controller.switch_camera(cam);
        self.report(result);
        if let Some(err) = fallback {
            self.camera_form.backend = CameraBackend::Simulated;
            self.status = Some((format!("{err}. Using the simulated camera"), true));
        }
        self.camera_form.config = self.controller.camera().config().clone();
    }

    fn saving_tab(&mut self, ui: &mut egui::Ui) {
        let naming = &mut self.controller.naming;
        ui.horizontal(|ui| {
            ui.label(format!("Root: {}", naming.root_directory.display()));
            if ui.button("Browse…").clicked() {
                if let Some(dir) = rfd::FileDialog::new()
                    .set_directory(&naming.root_directory)
                    .pick_folder()
                {
                    naming.root_directory = dir;
                }
            }
            if ui.button("Open").clicked() {
                if let Err(e) = opener::open(&naming.root_directory) {
                    error!(error = %e, "Could not open data folder");
                }
            }
        });
        ui.checkbox(&mut naming.use_dated_subdir, "Dated subdirectory");
        ui.horizontal(|ui| {
            ui.checkbox(&mut naming.dir_counter.enabled, "Directory number");
            if ui.text_edit_singleline(&mut self.dir_counter_text).lost_focus() {
                match parse_counter(&self.dir_counter_text) {
                    Ok(v) => naming.dir_counter.value = v,
                    Err(e) => self.status = Some((e.to_string(), true)),
                }
            }
        });
        ui.horizontal(|ui| {
            ui.checkbox(&mut naming.extra_dir_text.enabled, "Directory text");
            ui.text_edit_singleline(&mut naming.extra_dir_text.value);
        });
        ui.checkbox(&mut naming.include_date, "Date in filename");
        ui.checkbox(&mut naming.include_time, "Time in filename");
        ui.horizontal(|ui| {
            ui.checkbox(&mut naming.filename_text.enabled, "Filename text");
            ui.text_edit_singleline(&mut naming.filename_text.value);
        });
        ui.horizontal(|ui| {
            ui.checkbox(&mut naming.image_counter.enabled, "Image number");
            if ui.text_edit_singleline(&mut self.image_counter_text).lost_focus() {
                match parse_counter(&self.image_counter_text) {
                    Ok(v) => naming.image_counter.value = v,
                    Err(e) => self.status = Some((e.to_string(), true)),
                }
            }
        });
        let mut extension = naming.extension.clone();
        egui::ComboBox::from_label("Format")
            .selected_text(extension.clone())
            .show_ui(ui, |ui| {
                for ext in SUPPORTED_EXTENSIONS {
                    ui.selectable_value(&mut extension, ext.to_string(), ext);
                }
            });
        if extension != naming.extension {
            if let Err(e) = naming.set_extension(&extension) {
                self.status = Some((e.to_string(), true));
            }
        }
        ui.checkbox(&mut self.controller.save_sidecar, "Save metadata with image");
        if ui.button("Reset to defaults").clicked() {
            self.controller.naming.reset_to_defaults();
            self.sync_counter_text();
        }
    }

    fn metadata_tab(&mut self, ui: &mut egui::Ui) {
        self.microscope.show(ui, "Microscope");
        self.light.show(ui, "Light source");
        self.objective.show(ui, "Objective");
        let metadata = &mut self.controller.metadata;
        ui.horizontal(|ui| {
            ui.label("Tube magnification");
            for tube in [TubeMagnification::X1_0, TubeMagnification::X1_5] {
                ui.radio_value(&mut metadata.tube_magnification, tube, tube.label());
            }
        });
        ui.label("Notes");
        ui.text_edit_multiline(&mut metadata.notes);

        metadata.microscope = self.microscope.value();
        metadata.light = self.light.value();
        metadata.objective = self.objective.value();
        match metadata.magnification() {
            Some(m) => ui.label(format!("Total magnification: {m}x")),
            None => ui.label("Total magnification: unknown"),
        };
    }
}

impl eframe::App for CameraApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Metadata follows the form even while another tab is shown
        self.controller.metadata.microscope = self.microscope.value();
        self.controller.metadata.light = self.light.value();
        self.controller.metadata.objective = self.objective.value();

        self.tick(ctx);

        egui::TopBottomPanel::top("tabs").show(ctx, |ui| {
            ui.horizontal(|ui| {
                for (tab, label) in Tab::ALL {
                    ui.selectable_value(&mut self.tab, tab, label);
                }
            });
        });

        egui::SidePanel::left("controls")
            .resizable(true)
            .min_width(360.0)
            .show(ctx, |ui| match self.tab {
                Tab::ImageCapture => self.image_capture_tab(ui),
                Tab::Camera => self.camera_tab(ui),
                Tab::Saving => self.saving_tab(ui),
                Tab::Metadata => self.metadata_tab(ui),
                Tab::Roi => self.roi_tab(ui),
            });

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(format!("Frame {}", self.frame_number));
                ui.separator();
                ui.label(format!("Max pixel {}", self.max_pixel));
                ui.separator();
                let collides = self.path_label == crate::naming::OVERWRITE_WARNING;
                let color = if collides {
                    egui::Color32::RED
                } else {
                    ui.visuals().text_color()
                };
                ui.colored_label(color, &self.path_label);
            });
            if let Some((text, is_error)) = &self.status {
                let color = if *is_error {
                    egui::Color32::LIGHT_RED
                } else {
                    ui.visuals().text_color()
                };
                ui.colored_label(color, text);
            }
            if self.controller.pending_compressions() > 0 {
                ui.label(format!(
                    "Compressing {} series…",
                    self.controller.pending_compressions()
                ));
            }
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            if let Some(texture) = &self.texture {
                ui.image(texture);
            } else {
                ui.label("Waiting for camera…");
            }
        });

        ctx.request_repaint_after(self.config.tick());
    }
}
