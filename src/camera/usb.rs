//! USB camera backend with an optional piezo focus stage.
//!
//! The camera only delivers 8-bit monochrome frames and has no in-process rolling
//! buffer: the newest frame is copied out of driver memory on demand and the frame
//! number is always 1. Bounded sequence capture is not available. ROI, exposure and
//! frame time are applied live and read back from the driver.
//!
//! The piezo controller speaks in raw units where 32767 is full scale; [`PiezoStage`]
//! converts to and from percent.

use super::{BufferStatus, Camera, CameraConfig, FocusStage, Frame};
use crate::error::CameraError;
use std::thread;
use std::time::Duration;

/// Full-scale value of the piezo controller's voltage registers.
pub const PIEZO_FULL_SCALE: i32 = 32767;

/// Pixel clock used for every session, in MHz.
pub const PIXEL_CLOCK_MHZ: u32 = 43;

/// Raw camera operations. Integer returns are driver status codes (0 = success).
pub trait UsbCameraDriver {
    /// Initialize the first available camera.
    fn init_camera(&mut self) -> i32;
    /// Release the camera.
    fn exit_camera(&mut self) -> i32;
    /// Set the sensor pixel clock.
    fn set_pixel_clock(&mut self, mhz: u32) -> i32;
    /// Switch to 8-bit monochrome output.
    fn set_mono8(&mut self) -> i32;
    /// Request an AOI size.
    fn set_aoi_size(&mut self, width: u32, height: u32) -> i32;
    /// AOI size as applied.
    fn aoi_size(&mut self) -> (u32, u32);
    /// Request an AOI offset.
    fn set_aoi_pos(&mut self, x: u32, y: u32) -> i32;
    /// AOI offset as applied.
    fn aoi_pos(&mut self) -> (u32, u32);
    /// Request an exposure in milliseconds, returning the applied value.
    fn set_exposure(&mut self, ms: f64) -> f64;
    /// Request a frame rate in frames per second, returning the applied value.
    fn set_frame_rate(&mut self, fps: f64) -> f64;
    /// (Re)allocate the image memory the driver writes into.
    fn allocate_image_memory(&mut self, width: u32, height: u32) -> i32;
    /// Copy the newest frame into `out`.
    fn copy_image(&mut self, out: &mut [u8]) -> i32;
    /// Start free-running capture.
    fn capture_video(&mut self) -> i32;
    /// Stop free-running capture.
    fn stop_live_video(&mut self) -> i32;
}

/// Knob and display parameters of the piezo controller, in raw units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmiParams {
    /// 1 = voltage adjust, 2 = jogging, 3 = set voltage
    pub joystick_mode: i16,
    /// Voltage adjust speed, 1 (slow) to 3 (fast)
    pub joystick_rate: i16,
    /// Jog step size
    pub step: i32,
    /// Knob direction sense
    pub direction: i16,
    /// Preset voltage 1
    pub preset1: i32,
    /// Preset voltage 2
    pub preset2: i32,
    /// Display intensity, 0 to 100
    pub display_intensity: i16,
}

impl Default for MmiParams {
    fn default() -> Self {
        Self {
            joystick_mode: 2,
            joystick_rate: 1,
            step: percent_to_raw(5.0),
            direction: 1,
            preset1: 0,
            preset2: 0,
            display_intensity: 50,
        }
    }
}

/// Raw piezo controller operations. Integer returns are status codes (0 = success).
pub trait PiezoDriver {
    /// Connect to the controller with the given serial number.
    fn open(&mut self, serial: &str) -> i32;
    /// Apply loop, feedback and source settings and enable the output.
    fn configure(&mut self, options: &StageOptions) -> i32;
    /// Set the output voltage in raw units.
    fn set_output_voltage(&mut self, raw: i32) -> i32;
    /// Output voltage in raw units.
    fn output_voltage(&mut self) -> i32;
    /// Write knob/display parameters.
    fn set_mmi_params(&mut self, params: &MmiParams) -> i32;
    /// Read knob/display parameters.
    fn mmi_params(&mut self) -> MmiParams;
    /// Disable the output and disconnect.
    fn shutdown(&mut self);
}

/// Controller settings applied when the stage is opened.
#[derive(Debug, Clone)]
pub struct StageOptions {
    /// Device polling period
    pub poll_ms: u32,
    /// Maximum output voltage in tenths of a volt
    pub max_voltage_tenths: i32,
    /// Proportional feedback term
    pub proportional: i16,
    /// Integral feedback term
    pub integral: i16,
    /// 1 = open loop, 2 = closed loop
    pub loop_mode: i16,
    /// 0 software, 1 software+external, 2 software+potentiometer, 3 all
    pub voltage_source: i16,
    /// Feedback input, 3 = external SMA
    pub input_source: i16,
    /// Output voltage after opening, percent
    pub initial_output_percent: f64,
    /// Jog step after opening, percent
    pub initial_step_percent: f64,
    /// Time the controller needs before parameters read back
    pub update_delay: Duration,
    /// Time to let the output settle at zero before disconnecting
    pub settle_on_close: Duration,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            poll_ms: 10,
            max_voltage_tenths: 750,
            proportional: 100,
            integral: 15,
            loop_mode: 1,
            voltage_source: 2,
            input_source: 3,
            initial_output_percent: 0.0,
            initial_step_percent: 5.0,
            update_delay: Duration::from_millis(100),
            settle_on_close: Duration::from_secs(2),
        }
    }
}

/// Percent of full scale to raw controller units, clamped to 0..=100 percent.
pub fn percent_to_raw(percent: f64) -> i32 {
    (percent.clamp(0.0, 100.0) / 100.0 * f64::from(PIEZO_FULL_SCALE)).round() as i32
}

/// Raw controller units to percent of full scale.
pub fn raw_to_percent(raw: i32) -> f64 {
    100.0 * f64::from(raw) / f64::from(PIEZO_FULL_SCALE)
}

/// Piezo focus stage.
pub struct PiezoStage<P: PiezoDriver> {
    driver: P,
    serial: String,
    mmi: MmiParams,
    options: StageOptions,
}

impl<P: PiezoDriver> PiezoStage<P> {
    /// Connect, configure and move to the initial output voltage.
    pub fn open(mut driver: P, serial: &str, options: &StageOptions) -> Result<Self, CameraError> {
        let code = driver.open(serial);
        if code != 0 {
            return Err(CameraError::Open(format!(
                "Opening piezo driver {serial} failed with error code {code}"
            )));
        }
        let code = driver.configure(options);
        if code != 0 {
            driver.shutdown();
            return Err(CameraError::Driver {
                operation: "piezo configure",
                code,
            });
        }
        let mut stage = Self {
            driver,
            serial: serial.to_string(),
            mmi: MmiParams::default(),
            options: options.clone(),
        };
        stage.set_step_percent(options.initial_step_percent)?;
        stage.set_output_percent(options.initial_output_percent)?;
        tracing::info!(serial, "Piezo stage opened");
        Ok(stage)
    }

    /// Serial number of the controller.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn wait(&self) {
        if !self.options.update_delay.is_zero() {
            thread::sleep(self.options.update_delay);
        }
    }
}

impl<P: PiezoDriver> FocusStage for PiezoStage<P> {
    fn set_output_percent(&mut self, percent: f64) -> Result<(), CameraError> {
        match self.driver.set_output_voltage(percent_to_raw(percent)) {
            0 => Ok(()),
            code => Err(CameraError::Driver {
                operation: "piezo output voltage",
                code,
            }),
        }
    }

    fn output_percent(&mut self) -> Result<f64, CameraError> {
        Ok(raw_to_percent(self.driver.output_voltage()))
    }

    fn set_step_percent(&mut self, percent: f64) -> Result<(), CameraError> {
        let params = MmiParams {
            step: percent_to_raw(percent),
            ..self.mmi
        };
        match self.driver.set_mmi_params(&params) {
            0 => {
                self.mmi = params;
                Ok(())
            }
            code => Err(CameraError::Driver {
                operation: "piezo step voltage",
                code,
            }),
        }
    }

    fn step_percent(&mut self) -> Result<f64, CameraError> {
        self.wait();
        Ok(raw_to_percent(self.driver.mmi_params().step))
    }
}

impl<P: PiezoDriver> Drop for PiezoStage<P> {
    fn drop(&mut self) {
        tracing::info!(serial = %self.serial, "Closing piezo stage");
        if self.driver.set_output_voltage(0) == 0 && !self.options.settle_on_close.is_zero() {
            thread::sleep(self.options.settle_on_close);
        }
        self.driver.shutdown();
    }
}

/// USB camera.
pub struct UsbCamera<D: UsbCameraDriver> {
    driver: D,
    config: CameraConfig,
    opened: bool,
    live: bool,
    stage: Option<Box<dyn FocusStage>>,
}

impl<D: UsbCameraDriver> UsbCamera<D> {
    /// Wrap a driver. The camera stays closed until [`Camera::open`].
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            config: CameraConfig {
                model: "ThorCam FS".to_string(),
                ..CameraConfig::default()
            },
            opened: false,
            live: false,
            stage: None,
        }
    }

    /// Connect the piezo focus stage. Failure is logged and leaves the camera usable.
    pub fn attach_stage<P>(&mut self, driver: P, serial: &str, options: &StageOptions) -> Result<(), CameraError>
    where
        P: PiezoDriver + 'static,
    {
        match PiezoStage::open(driver, serial, options) {
            Ok(stage) => {
                self.stage = Some(Box::new(stage));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(serial, error = %err, "Focus stage unavailable");
                Err(err)
            }
        }
    }

    fn require_open(&self) -> Result<(), CameraError> {
        if self.opened {
            Ok(())
        } else {
            Err(CameraError::NotOpen)
        }
    }

    fn apply(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        if config.bit_depth != 8 {
            tracing::warn!(requested = config.bit_depth, "USB camera only supports 8-bit images");
        }

        let (w, h) = config.roi_shape;
        match self.driver.set_aoi_size(w, h) {
            0 => {}
            code => tracing::warn!(code, width = w, height = h, "Setting ROI size failed"),
        }
        let roi_shape = self.driver.aoi_size();
        let code = self.driver.allocate_image_memory(roi_shape.0, roi_shape.1);
        if code != 0 {
            return Err(CameraError::Driver {
                operation: "allocate image memory",
                code,
            });
        }

        let (x, y) = config.roi_pos;
        match self.driver.set_aoi_pos(x, y) {
            0 => {}
            code => tracing::warn!(code, x, y, "Setting ROI position failed"),
        }
        let roi_pos = self.driver.aoi_pos();

        let requested = if config.frame_time_ms == 0.0 {
            0.001
        } else {
            config.frame_time_ms
        };
        let fps = self.driver.set_frame_rate(1.0 / (requested / 1000.0));
        let frame_time_ms = if fps > 0.0 { 1000.0 / fps } else { requested };
        let exposure_ms = self.driver.set_exposure(config.exposure_ms);

        self.config = CameraConfig {
            model: config.model.clone(),
            bit_depth: 8,
            roi_shape,
            roi_pos,
            exposure_ms,
            frame_time_ms,
        };
        Ok(())
    }
}

impl<D: UsbCameraDriver> Camera for UsbCamera<D> {
    fn name(&self) -> &str {
        "USB camera"
    }

    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        if self.opened {
            self.close();
        }
        let code = self.driver.init_camera();
        if code != 0 {
            return Err(CameraError::Open(format!(
                "Opening the USB camera failed with error code {code}"
            )));
        }
        self.driver.set_pixel_clock(PIXEL_CLOCK_MHZ);
        self.driver.set_mono8();
        self.opened = true;
        if let Err(err) = self.apply(config) {
            self.close();
            return Err(err);
        }
        tracing::info!(roi = ?self.config.roi_shape, "USB camera opened");
        Ok(())
    }

    fn close(&mut self) {
        if !self.opened {
            return;
        }
        if self.live {
            self.driver.stop_live_video();
            self.live = false;
        }
        match self.driver.exit_camera() {
            0 => tracing::info!("USB camera closed"),
            code => tracing::warn!(code, "Closing USB camera failed"),
        }
        self.opened = false;
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn config(&self) -> &CameraConfig {
        &self.config
    }

    fn get_image(&mut self, _index: Option<usize>) -> Result<Frame, CameraError> {
        self.require_open()?;
        let (w, h) = self.config.roi_shape;
        let mut data = vec![0u8; w as usize * h as usize];
        match self.driver.copy_image(&mut data) {
            0 => {}
            code => {
                return Err(CameraError::Driver {
                    operation: "copy image",
                    code,
                })
            }
        }
        Frame::from_u8(w, h, data).ok_or(CameraError::Driver {
            operation: "copy image",
            code: -1,
        })
    }

    fn get_frame_number(&mut self) -> usize {
        1
    }

    fn start_continuous_capture(&mut self, _buffer_depth: usize) -> Result<(), CameraError> {
        self.require_open()?;
        match self.driver.capture_video() {
            0 => {
                self.live = true;
                Ok(())
            }
            code => Err(CameraError::Driver {
                operation: "capture video",
                code,
            }),
        }
    }

    fn start_sequence_capture(&mut self, _n_frames: usize) -> Result<(), CameraError> {
        Err(CameraError::Unsupported("sequence capture"))
    }

    fn stop_live_capture(&mut self) -> Result<(), CameraError> {
        self.require_open()?;
        self.driver.stop_live_video();
        self.live = false;
        Ok(())
    }

    fn finished_live_sequence(&mut self) -> bool {
        false
    }

    fn buffer_status(&mut self) -> BufferStatus {
        if self.opened {
            BufferStatus {
                capacity: 1,
                head: 1,
                filled: 1,
            }
        } else {
            BufferStatus::default()
        }
    }

    fn supports_sequence_capture(&self) -> bool {
        false
    }

    fn reconfigure(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        if !self.opened {
            return self.open(config);
        }
        self.apply(config)
    }

    fn focus_stage(&mut self) -> Option<&mut dyn FocusStage> {
        self.stage.as_mut().map(|s| s.as_mut() as &mut dyn FocusStage)
    }
}

impl<D: UsbCameraDriver> Drop for UsbCamera<D> {
    fn drop(&mut self) {
        self.stage = None;
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct FakeUsb {
        init_status: i32,
        aoi: (u32, u32),
        pos: (u32, u32),
        fps: f64,
        exposure: f64,
        live: bool,
    }

    impl UsbCameraDriver for FakeUsb {
        fn init_camera(&mut self) -> i32 {
            self.init_status
        }
        fn exit_camera(&mut self) -> i32 {
            0
        }
        fn set_pixel_clock(&mut self, _mhz: u32) -> i32 {
            0
        }
        fn set_mono8(&mut self) -> i32 {
            0
        }
        fn set_aoi_size(&mut self, width: u32, height: u32) -> i32 {
            // The sensor only accepts widths in steps of 4.
            self.aoi = (width / 4 * 4, height);
            0
        }
        fn aoi_size(&mut self) -> (u32, u32) {
            self.aoi
        }
        fn set_aoi_pos(&mut self, x: u32, y: u32) -> i32 {
            self.pos = (x, y);
            0
        }
        fn aoi_pos(&mut self) -> (u32, u32) {
            self.pos
        }
        fn set_exposure(&mut self, ms: f64) -> f64 {
            self.exposure = ms.min(50.0);
            self.exposure
        }
        fn set_frame_rate(&mut self, fps: f64) -> f64 {
            self.fps = fps.min(100.0);
            self.fps
        }
        fn allocate_image_memory(&mut self, _width: u32, _height: u32) -> i32 {
            0
        }
        fn copy_image(&mut self, out: &mut [u8]) -> i32 {
            out.fill(42);
            0
        }
        fn capture_video(&mut self) -> i32 {
            self.live = true;
            0
        }
        fn stop_live_video(&mut self) -> i32 {
            self.live = false;
            0
        }
    }

    #[derive(Default)]
    struct PiezoLog {
        output: i32,
        mmi: Option<MmiParams>,
        shut_down: bool,
        outputs: Vec<i32>,
    }

    struct FakePiezo(Rc<RefCell<PiezoLog>>);

    impl PiezoDriver for FakePiezo {
        fn open(&mut self, serial: &str) -> i32 {
            if serial == "29000000" {
                0
            } else {
                -1
            }
        }
        fn configure(&mut self, _options: &StageOptions) -> i32 {
            0
        }
        fn set_output_voltage(&mut self, raw: i32) -> i32 {
            let mut log = self.0.borrow_mut();
            log.output = raw;
            log.outputs.push(raw);
            0
        }
        fn output_voltage(&mut self) -> i32 {
            self.0.borrow().output
        }
        fn set_mmi_params(&mut self, params: &MmiParams) -> i32 {
            self.0.borrow_mut().mmi = Some(*params);
            0
        }
        fn mmi_params(&mut self) -> MmiParams {
            self.0.borrow().mmi.unwrap_or_default()
        }
        fn shutdown(&mut self) {
            self.0.borrow_mut().shut_down = true;
        }
    }

    fn quick_options() -> StageOptions {
        StageOptions {
            update_delay: Duration::ZERO,
            settle_on_close: Duration::ZERO,
            ..StageOptions::default()
        }
    }

    #[test]
    fn percent_conversion_clamps_and_rounds() {
        assert_eq!(percent_to_raw(-5.0), 0);
        assert_eq!(percent_to_raw(150.0), PIEZO_FULL_SCALE);
        assert_eq!(percent_to_raw(50.0), 16384);
        assert!((raw_to_percent(16384) - 50.0).abs() < 0.01);
    }

    #[test]
    fn open_reads_back_applied_settings() {
        let mut cam = UsbCamera::new(FakeUsb::default());
        cam.open(&CameraConfig {
            bit_depth: 12,
            roi_shape: (1022, 768),
            roi_pos: (8, 16),
            exposure_ms: 80.0,
            frame_time_ms: 0.0,
            ..CameraConfig::default()
        })
        .unwrap();
        let cfg = cam.config();
        assert_eq!(cfg.bit_depth, 8);
        assert_eq!(cfg.roi_shape, (1020, 768));
        assert_eq!(cfg.roi_pos, (8, 16));
        assert_eq!(cfg.exposure_ms, 50.0);
        assert!((cfg.frame_time_ms - 10.0).abs() < 1e-9);
    }

    #[test]
    fn init_failure_is_an_open_error() {
        let mut cam = UsbCamera::new(FakeUsb {
            init_status: 3,
            ..FakeUsb::default()
        });
        let err = cam.open(&CameraConfig::default()).unwrap_err();
        assert!(matches!(err, CameraError::Open(msg) if msg.contains('3')));
    }

    #[test]
    fn frame_number_is_constant_and_sequences_unsupported() {
        let mut cam = UsbCamera::new(FakeUsb::default());
        cam.open(&CameraConfig {
            roi_shape: (8, 8),
            ..CameraConfig::default()
        })
        .unwrap();
        cam.start_continuous_capture(10).unwrap();
        assert_eq!(cam.get_image(None).unwrap().get(0, 0), Some(42));
        assert_eq!(cam.get_frame_number(), 1);
        assert!(!cam.supports_sequence_capture());
        assert_eq!(
            cam.start_sequence_capture(5),
            Err(CameraError::Unsupported("sequence capture"))
        );
    }

    #[test]
    fn stage_converts_percent_and_zeroes_output_on_drop() {
        let log = Rc::new(RefCell::new(PiezoLog::default()));
        let mut cam = UsbCamera::new(FakeUsb::default());
        cam.open(&CameraConfig::default()).unwrap();
        cam.attach_stage(FakePiezo(log.clone()), "29000000", &quick_options())
            .unwrap();

        let stage = cam.focus_stage().unwrap();
        stage.set_output_percent(25.0).unwrap();
        assert_eq!(log.borrow().output, 8192);
        assert!((stage.output_percent().unwrap() - 25.0).abs() < 0.01);
        stage.set_step_percent(200.0).unwrap();
        assert!((stage.step_percent().unwrap() - 100.0).abs() < 1e-9);

        drop(cam);
        let log = log.borrow();
        assert_eq!(log.outputs.last(), Some(&0));
        assert!(log.shut_down);
    }

    #[test]
    fn unknown_stage_serial_leaves_camera_usable() {
        let log = Rc::new(RefCell::new(PiezoLog::default()));
        let mut cam = UsbCamera::new(FakeUsb::default());
        cam.open(&CameraConfig::default()).unwrap();
        assert!(cam
            .attach_stage(FakePiezo(log), "123", &quick_options())
            .is_err());
        assert!(cam.focus_stage().is_none());
        assert!(cam.is_open());
    }
}
