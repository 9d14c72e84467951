//! Camera abstraction
//!
//! Every backend (simulated, frame grabber, USB camera with piezo stage) implements the
//! [`Camera`] trait, so the capture controller never needs to know which hardware is
//! attached. Backends own their rolling buffer, either in process memory or inside the
//! acquisition hardware, and address it with 1-based indices.
//!
//! Vendor symbols live behind small driver traits ([`frame_grabber::GrabberDriver`],
//! [`usb::UsbCameraDriver`], [`usb::PiezoDriver`]). The real FFI bindings are only
//! compiled with the `epix` / `thorlabs` features; tests drive the same backend code
//! through fakes.
//!
//! # Example
//!
//! ```no_run
//! use camera_controller::camera::{self, CameraBackend};
//! use camera_controller::config::CameraSettings;
//!
//! let settings = CameraSettings::default();
//! let (mut cam, fallback) = camera::connect(CameraBackend::FrameGrabber, &settings);
//! if let Some(err) = fallback {
//!     eprintln!("frame grabber unavailable, using simulation: {err}");
//! }
//! cam.start_continuous_capture(100)?;
//! let frame = cam.get_image(None)?;
//! # Ok::<(), camera_controller::error::CameraError>(())
//! ```

pub mod frame;
pub mod frame_grabber;
pub mod rolling;
pub mod simulated;
pub mod usb;

#[cfg(any(feature = "epix", feature = "thorlabs"))]
mod ffi;

pub use frame::{Frame, Pixels};
pub use rolling::{BufferStatus, RollingBuffer};
pub use simulated::SimulatedCamera;

use crate::config::CameraSettings;
use crate::error::CameraError;
use serde::{Deserialize, Serialize};

/// Bit depths a backend may be asked for.
pub const SUPPORTED_BIT_DEPTHS: [u8; 4] = [8, 10, 12, 16];

/// Acquisition parameters applied when a camera is opened.
///
/// After `open`, [`Camera::config`] reports the values the hardware actually accepted,
/// which may differ from the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Camera model, used to resolve frame grabber format files
    pub model: String,
    /// Bits per pixel
    pub bit_depth: u8,
    /// Region of interest size (width, height)
    pub roi_shape: (u32, u32),
    /// Region of interest offset (x, y)
    pub roi_pos: (u32, u32),
    /// Exposure time in milliseconds
    pub exposure_ms: f64,
    /// Frame period in milliseconds
    pub frame_time_ms: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            model: "PhotonFocus".to_string(),
            bit_depth: 8,
            roi_shape: (1024, 1024),
            roi_pos: (0, 0),
            exposure_ms: 0.0,
            frame_time_ms: 0.0,
        }
    }
}

impl CameraConfig {
    /// Reject requests no backend can satisfy.
    pub fn validate(&self) -> Result<(), CameraError> {
        if !SUPPORTED_BIT_DEPTHS.contains(&self.bit_depth) {
            return Err(CameraError::InvalidConfig(format!(
                "bit depth {} is not one of {:?}",
                self.bit_depth, SUPPORTED_BIT_DEPTHS
            )));
        }
        if self.roi_shape.0 == 0 || self.roi_shape.1 == 0 {
            return Err(CameraError::InvalidConfig(format!(
                "ROI {}x{} is empty",
                self.roi_shape.0, self.roi_shape.1
            )));
        }
        if self.exposure_ms < 0.0 || self.frame_time_ms < 0.0 {
            return Err(CameraError::InvalidConfig(
                "exposure and frame time must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Uniform capture interface implemented by every backend.
pub trait Camera {
    /// Human readable backend name.
    fn name(&self) -> &str;

    /// (Re)initialize with `config`. Closes first when already open.
    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError>;

    /// Release the device. No-op when not open.
    fn close(&mut self);

    /// Whether `open` has succeeded and `close` has not been called since.
    fn is_open(&self) -> bool;

    /// Configuration as read back from the device.
    fn config(&self) -> &CameraConfig;

    /// Frame at a 1-based buffer index, or the most recent frame for `None`.
    ///
    /// Never blocks: when nothing new has arrived the last known frame is returned again.
    fn get_image(&mut self, index: Option<usize>) -> Result<Frame, CameraError>;

    /// Current 1-based write position in the rolling buffer.
    fn get_frame_number(&mut self) -> usize;

    /// Enter live mode, keeping the most recent `buffer_depth` frames.
    fn start_continuous_capture(&mut self, buffer_depth: usize) -> Result<(), CameraError>;

    /// Capture exactly `n_frames` frames into slots 1..=n, overriding continuous capture.
    fn start_sequence_capture(&mut self, n_frames: usize) -> Result<(), CameraError>;

    /// Freeze. Subsequent `get_image(None)` calls keep returning the last frame.
    fn stop_live_capture(&mut self) -> Result<(), CameraError>;

    /// True once a bounded sequence has captured all of its frames.
    fn finished_live_sequence(&mut self) -> bool;

    /// Write head and fill level of the rolling buffer.
    fn buffer_status(&mut self) -> BufferStatus;

    /// Whether `start_sequence_capture` is available on this backend.
    fn supports_sequence_capture(&self) -> bool {
        true
    }

    /// Apply a new configuration. Backends that cannot change settings live close and
    /// reopen; the resulting [`Camera::config`] is the same either way.
    fn reconfigure(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        self.close();
        self.open(config)
    }

    /// Focus stage attached to this camera, if any.
    fn focus_stage(&mut self) -> Option<&mut dyn FocusStage> {
        None
    }
}

/// Piezo focus control expressed in percent of the stage's full voltage range.
pub trait FocusStage {
    /// Drive the output voltage. Values are clamped to 0..=100.
    fn set_output_percent(&mut self, percent: f64) -> Result<(), CameraError>;

    /// Output voltage as reported by the controller.
    fn output_percent(&mut self) -> Result<f64, CameraError>;

    /// Jog step size used by the controller's knob. Clamped to 0..=100.
    fn set_step_percent(&mut self, percent: f64) -> Result<(), CameraError>;

    /// Jog step size as reported by the controller.
    fn step_percent(&mut self) -> Result<f64, CameraError>;
}

/// Available camera backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CameraBackend {
    /// Random frames, always available
    #[default]
    Simulated,
    /// EPIX frame grabber driven industrial camera
    FrameGrabber,
    /// Thorlabs USB camera with KPZ101 piezo focus stage
    Usb,
}

impl CameraBackend {
    /// All backends, in menu order.
    pub const ALL: [CameraBackend; 3] = [
        CameraBackend::Simulated,
        CameraBackend::FrameGrabber,
        CameraBackend::Usb,
    ];

    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            CameraBackend::Simulated => "Simulated",
            CameraBackend::FrameGrabber => "Frame grabber",
            CameraBackend::Usb => "USB camera + focus stage",
        }
    }
}

impl std::str::FromStr for CameraBackend {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulated" | "sim" => Ok(CameraBackend::Simulated),
            "frame-grabber" | "framegrabber" | "epix" => Ok(CameraBackend::FrameGrabber),
            "usb" | "thorcam" => Ok(CameraBackend::Usb),
            other => Err(CameraError::InvalidConfig(format!(
                "unknown camera backend '{other}'. Must be one of: simulated, frame-grabber, usb"
            ))),
        }
    }
}

/// Build and open the requested backend.
///
/// When the requested hardware cannot be opened the simulated camera is returned
/// instead, together with the error that caused the fallback.
pub fn connect(
    backend: CameraBackend,
    settings: &CameraSettings,
) -> (Box<dyn Camera>, Option<CameraError>) {
    let config = settings.camera_config();
    match open_backend(backend, settings, &config) {
        Ok(camera) => {
            tracing::info!(backend = ?backend, name = camera.name(), "Camera opened");
            (camera, None)
        }
        Err(err) => {
            tracing::warn!(backend = ?backend, error = %err, "Camera unavailable, falling back to simulation");
            let mut sim = SimulatedCamera::new();
            let sim_config = CameraConfig {
                roi_shape: config.roi_shape,
                ..CameraConfig::default()
            };
            if let Err(sim_err) = sim.open(&sim_config) {
                tracing::error!(error = %sim_err, "Simulated camera rejected configuration, using defaults");
                let _ = sim.open(&CameraConfig::default());
            }
            (Box::new(sim), Some(err))
        }
    }
}

/// Build and open a backend without falling back.
pub fn open_backend(
    backend: CameraBackend,
    settings: &CameraSettings,
    config: &CameraConfig,
) -> Result<Box<dyn Camera>, CameraError> {
    config.validate()?;
    match backend {
        CameraBackend::Simulated => {
            let mut cam = SimulatedCamera::new();
            cam.open(config)?;
            Ok(Box::new(cam))
        }
        CameraBackend::FrameGrabber => open_frame_grabber(settings, config),
        CameraBackend::Usb => open_usb(settings, config),
    }
}

#[cfg(feature = "epix")]
fn open_frame_grabber(
    settings: &CameraSettings,
    config: &CameraConfig,
) -> Result<Box<dyn Camera>, CameraError> {
    let driver = ffi::epix::XclibDriver::new();
    let mut cam = frame_grabber::FrameGrabberCamera::new(driver, settings.format_dir.clone());
    cam.open(config)?;
    Ok(Box::new(cam))
}

#[cfg(not(feature = "epix"))]
fn open_frame_grabber(
    _settings: &CameraSettings,
    _config: &CameraConfig,
) -> Result<Box<dyn Camera>, CameraError> {
    Err(CameraError::FeatureNotEnabled("epix".to_string()))
}

#[cfg(feature = "thorlabs")]
fn open_usb(settings: &CameraSettings, config: &CameraConfig) -> Result<Box<dyn Camera>, CameraError> {
    let mut cam = usb::UsbCamera::new(ffi::thorlabs::Uc480Driver::new());
    cam.open(config)?;
    if let Some(serial) = &settings.stage_serial {
        // A missing stage is logged by attach_stage; the camera stays usable.
        let _ = cam.attach_stage(ffi::thorlabs::KinesisPiezo::new(), serial, &usb::StageOptions::default());
    }
    Ok(Box::new(cam))
}

#[cfg(not(feature = "thorlabs"))]
fn open_usb(_settings: &CameraSettings, _config: &CameraConfig) -> Result<Box<dyn Camera>, CameraError> {
    Err(CameraError::FeatureNotEnabled("thorlabs".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn config_validation() {
        assert!(CameraConfig::default().validate().is_ok());
        let bad_depth = CameraConfig {
            bit_depth: 14,
            ..CameraConfig::default()
        };
        assert!(bad_depth.validate().is_err());
        let empty = CameraConfig {
            roi_shape: (0, 64),
            ..CameraConfig::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("simulated".parse::<CameraBackend>().unwrap(), CameraBackend::Simulated);
        assert_eq!("Frame-Grabber".parse::<CameraBackend>().unwrap(), CameraBackend::FrameGrabber);
        assert_eq!("usb".parse::<CameraBackend>().unwrap(), CameraBackend::Usb);
        assert!("gige".parse::<CameraBackend>().is_err());
    }

    #[cfg(not(feature = "epix"))]
    #[test]
    #[traced_test]
    fn missing_hardware_falls_back_to_simulation() {
        let settings = CameraSettings::default();
        let (cam, err) = connect(CameraBackend::FrameGrabber, &settings);
        assert_eq!(cam.name(), "Simulated");
        assert!(cam.is_open());
        assert!(matches!(err, Some(CameraError::FeatureNotEnabled(_))));
        assert!(logs_contain("falling back to simulation"));
    }

    #[test]
    fn simulated_connects_without_fallback() {
        let (cam, err) = connect(CameraBackend::Simulated, &CameraSettings::default());
        assert!(err.is_none());
        assert_eq!(cam.name(), "Simulated");
    }
}
