//! Configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `config/camera_controller.toml` (or the file passed with `--config`)
//! 3. Environment variables prefixed with `CAMCTL_`, with `__` separating sections
//!
//! # Example
//! ```no_run
//! use camera_controller::config::AppConfig;
//!
//! // CAMCTL_CAMERA__BIT_DEPTH=12 overrides camera.bit_depth
//! let config = AppConfig::load()?;
//! println!("Saving under {}", config.saving.root_directory.display());
//! # Ok::<(), figment::Error>(())
//! ```

use crate::camera::{CameraBackend, CameraConfig, SUPPORTED_BIT_DEPTHS};
use crate::logging::OutputFormat;
use crate::naming::SUPPORTED_EXTENSIONS;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/camera_controller.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "CAMCTL_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Camera backend and acquisition parameters
    pub camera: CameraSettings,
    /// Live view and capture timing
    pub capture: CaptureSettings,
    /// Output location and filename defaults
    pub saving: SavingSettings,
    /// Choices offered on the metadata tab
    pub metadata: MetadataPresets,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Window title
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Camera Controller".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// Camera selection and the parameters it is opened with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Backend to open at startup
    pub backend: CameraBackend,
    /// Camera model (selects the frame grabber format file)
    pub model: String,
    /// Bits per pixel
    pub bit_depth: u8,
    /// ROI width in pixels
    pub roi_width: u32,
    /// ROI height in pixels
    pub roi_height: u32,
    /// ROI x offset
    pub roi_x: u32,
    /// ROI y offset
    pub roi_y: u32,
    /// Exposure in milliseconds
    pub exposure_ms: f64,
    /// Frame period in milliseconds
    pub frame_time_ms: f64,
    /// Frames kept in the rolling buffer while live
    pub buffer_depth: usize,
    /// Directory holding frame grabber format files
    pub format_dir: PathBuf,
    /// Serial number of the piezo focus controller, if one is attached
    pub stage_serial: Option<String>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            backend: CameraBackend::Simulated,
            model: "PhotonFocus".to_string(),
            bit_depth: 8,
            roi_width: 1024,
            roi_height: 1024,
            roi_x: 0,
            roi_y: 0,
            exposure_ms: 0.0,
            frame_time_ms: 0.0,
            buffer_depth: default_buffer_depth(),
            format_dir: PathBuf::from("formatFiles"),
            stage_serial: None,
        }
    }
}

impl CameraSettings {
    /// Parameters passed to [`crate::camera::Camera::open`].
    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            model: self.model.clone(),
            bit_depth: self.bit_depth,
            roi_shape: (self.roi_width, self.roi_height),
            roi_pos: (self.roi_x, self.roi_y),
            exposure_ms: self.exposure_ms,
            frame_time_ms: self.frame_time_ms,
        }
    }
}

/// Live view and capture timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Display/poll period in milliseconds
    pub tick_ms: u64,
    /// Default frame count for a fast time series
    pub fast_series_frames: usize,
    /// Default frame count for a slow time series
    pub slow_series_frames: usize,
    /// Default spacing of slow time series frames
    #[serde(with = "humantime_serde")]
    pub slow_series_interval: Duration,
    /// Fast series not finished after this long are cancelled
    #[serde(with = "humantime_serde")]
    pub sequence_timeout: Duration,
    /// Edge length of the square preview, in screen pixels
    pub preview_size: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            fast_series_frames: 100,
            slow_series_frames: 10,
            slow_series_interval: Duration::from_secs(60),
            sequence_timeout: Duration::from_secs(60),
            preview_size: 750,
        }
    }
}

/// Output location and filename defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavingSettings {
    /// Root directory for all saved data
    pub root_directory: PathBuf,
    /// Image extension, `.tif` or `.png`
    pub extension: String,
    /// Default free text in filenames
    pub filename_text: String,
    /// Insert a `YYYY-MM-DD` subdirectory under the root
    pub use_dated_subdir: bool,
    /// Write a YAML metadata file next to every saved image
    pub save_metadata_sidecar: bool,
}

impl Default for SavingSettings {
    fn default() -> Self {
        Self {
            root_directory: default_root_directory(),
            extension: ".tif".to_string(),
            filename_text: "image".to_string(),
            use_dated_subdir: false,
            save_metadata_sidecar: true,
        }
    }
}

/// Choices offered on the metadata tab. "Other" is always available in addition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataPresets {
    /// Microscope names
    pub microscopes: Vec<String>,
    /// Illumination sources
    pub light_sources: Vec<String>,
    /// Objectives
    pub objectives: Vec<String>,
}

impl Default for MetadataPresets {
    fn default() -> Self {
        Self {
            microscopes: ["Uberscope", "Mgruberscope", "George", "Superscope"]
                .map(String::from)
                .to_vec(),
            light_sources: ["Red laser, 660 nm", "White, brightfield illumination"]
                .map(String::from)
                .to_vec(),
            objectives: [
                "Nikon 60x Water Immersion, Correction Collar:",
                "Nikon 100x Oil Immersion",
                "Nikon 10x, air",
                "Nikon 40x, air",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

// Default value functions
fn default_buffer_depth() -> usize {
    100
}

fn default_tick_ms() -> u64 {
    30
}

fn default_root_directory() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("camera_data")
}

impl AppConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// The provider stack, exposed for callers that want to add their own layers.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if !SUPPORTED_BIT_DEPTHS.contains(&self.camera.bit_depth) {
            return Err(format!(
                "Invalid bit_depth {}. Must be one of: {:?}",
                self.camera.bit_depth, SUPPORTED_BIT_DEPTHS
            ));
        }

        if self.camera.roi_width == 0 || self.camera.roi_height == 0 {
            return Err("ROI width and height must be non-zero".to_string());
        }

        if self.camera.buffer_depth == 0 {
            return Err("buffer_depth must be at least 1".to_string());
        }

        if self.capture.tick_ms == 0 {
            return Err("tick_ms must be at least 1".to_string());
        }

        if self.capture.fast_series_frames == 0 || self.capture.slow_series_frames == 0 {
            return Err("Time series must contain at least one frame".to_string());
        }

        if !SUPPORTED_EXTENSIONS.contains(&self.saving.extension.as_str()) {
            return Err(format!(
                "Invalid extension '{}'. Must be one of: {}",
                self.saving.extension,
                SUPPORTED_EXTENSIONS.join(", ")
            ));
        }

        Ok(())
    }

    /// Tick period as a duration.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.capture.tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.tick_ms, 30);
        assert_eq!(config.capture.preview_size, 750);
        assert_eq!(config.saving.extension, ".tif");
    }

    #[test]
    #[serial]
    fn missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    #[serial]
    fn toml_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("camera_controller.toml");
        std::fs::write(
            &path,
            r#"
[camera]
backend = "frame-grabber"
bit_depth = 12
roi_width = 512
roi_height = 512

[capture]
slow_series_interval = "2m 30s"

[saving]
root_directory = "/data"
extension = ".png"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.camera.backend, CameraBackend::FrameGrabber);
        assert_eq!(config.camera.camera_config().roi_shape, (512, 512));
        assert_eq!(config.capture.slow_series_interval, Duration::from_secs(150));
        assert_eq!(config.saving.root_directory, PathBuf::from("/data"));
        assert_eq!(config.capture.tick_ms, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("CAMCTL_CAMERA__BIT_DEPTH", "10");
        let config = AppConfig::load_from(dir.path().join("absent.toml"));
        std::env::remove_var("CAMCTL_CAMERA__BIT_DEPTH");
        assert_eq!(config.unwrap().camera.bit_depth, 10);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = AppConfig::default();
        config.application.log_level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.camera.bit_depth = 14;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.saving.extension = ".jpg".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.camera.buffer_depth = 0;
        assert!(config.validate().is_err());
    }
}
