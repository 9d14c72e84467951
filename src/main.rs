//! CLI Entry Point for camera-controller
//!
//! # Usage
//!
//! Launch the GUI:
//! ```bash
//! camera-controller --config config/camera_controller.toml --camera frame-grabber
//! ```
//!
//! Compress a series container left behind by an interrupted session:
//! ```bash
//! camera-controller compress /data/00/image0000.uncompressed.tif
//! ```

use anyhow::{anyhow, Context, Result};
use camera_controller::camera::{self, CameraBackend};
use camera_controller::capture::CaptureController;
use camera_controller::config::{AppConfig, DEFAULT_CONFIG_PATH};
use camera_controller::gui::CameraApp;
use camera_controller::{logging, persistence};
use clap::{Parser, Subcommand};
use eframe::egui;
use std::path::PathBuf;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "camera-controller")]
#[command(about = "Live view, capture and archival of microscope camera frames", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Camera backend, overriding the configuration
    #[arg(long, value_enum)]
    camera: Option<CameraBackend>,

    /// Log level, overriding the configuration
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a `<name>.uncompressed.tif|h5` series container
    Compress {
        /// Container file
        container: PathBuf,

        /// Keep the uncompressed container
        #[arg(long)]
        keep: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(backend) = cli.camera {
        config.camera.backend = backend;
    }
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    config.validate().map_err(|e| anyhow!(e))?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    match cli.command {
        Some(Commands::Compress { container, keep }) => {
            let output = persistence::compress_container(&container, keep)?;
            println!("{}", output.display());
            Ok(())
        }
        None => run_gui(config),
    }
}

fn run_gui(config: AppConfig) -> Result<()> {
    let backend = config.camera.backend;
    let (cam, fallback) = camera::connect(backend, &config.camera);
    if let Some(err) = &fallback {
        warn!(error = %err, "Using the simulated camera");
    }
    let connected = if fallback.is_some() {
        CameraBackend::Simulated
    } else {
        backend
    };
    info!(camera = cam.name(), "Starting {}", config.application.name);

    let controller = CaptureController::new(cam, &config);
    let title = config.application.name.clone();
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1200.0, 860.0]),
        ..Default::default()
    };
    eframe::run_native(
        &title,
        options,
        Box::new(move |cc| Ok(Box::new(CameraApp::new(cc, controller, config, connected)))),
    )
    .map_err(|e| anyhow!("GUI terminated with an error: {e}"))
}
