//! Frame grabber backend.
//!
//! The grabber is configured entirely by a "format file" chosen from the camera model,
//! bit depth and ROI. Exposure, frame time and ROI position are set on the camera
//! itself (outside this program) and read back as zero. The rolling buffer lives in
//! grabber memory; this type only tracks its depth.

use super::{BufferStatus, Camera, CameraConfig, Frame};
use crate::error::CameraError;
use std::path::{Path, PathBuf};

/// Driver status: success.
pub const STATUS_OK: i32 = 0;
/// Driver status: format file could not be found.
pub const STATUS_FORMAT_FILE_MISSING: i32 = -13;
/// Driver status: the grabber is already open in another process.
pub const STATUS_ALREADY_OPEN: i32 = -23;

/// Raw grabber operations. Return values are driver status codes.
pub trait GrabberDriver {
    /// Open the board with a format file.
    fn open(&mut self, format_file: &Path) -> i32;
    /// Close the board.
    fn close(&mut self) -> i32;
    /// 1-based index of the most recently captured buffer.
    fn captured_buffer(&mut self) -> usize;
    /// Frames captured since the board was opened.
    fn captured_count(&mut self) -> u64;
    /// Image geometry as the board reports it: (width, height, bits per pixel).
    fn image_dims(&mut self) -> (u32, u32, u8);
    /// Copy an 8-bit buffer.
    fn read_u8(&mut self, buffer: usize, out: &mut [u8]) -> i32;
    /// Copy a 16-bit buffer (right-aligned samples).
    fn read_u16(&mut self, buffer: usize, out: &mut [u16]) -> i32;
    /// Capture into buffers `start..=end`, stopping after `count` frames (0 = never).
    fn go_live_seq(&mut self, start: usize, end: usize, count: usize) -> i32;
    /// Stop capturing.
    fn go_unlive(&mut self) -> i32;
    /// Whether a capture is still running.
    fn gone_live(&mut self) -> bool;
}

/// Format file name for a model, bit depth and ROI size.
pub fn format_file_name(model: &str, bit_depth: u8, roi: (u32, u32)) -> String {
    format!("{model}_{bit_depth}bit_{}x{}.fmt", roi.0, roi.1)
}

/// Camera attached through a frame grabber.
pub struct FrameGrabberCamera<D: GrabberDriver> {
    driver: D,
    format_dir: PathBuf,
    config: CameraConfig,
    opened: bool,
    depth: usize,
    count_at_start: u64,
}

impl<D: GrabberDriver> FrameGrabberCamera<D> {
    /// Wrap a driver. Format files are looked up in `format_dir`.
    pub fn new(driver: D, format_dir: PathBuf) -> Self {
        Self {
            driver,
            format_dir,
            config: CameraConfig::default(),
            opened: false,
            depth: 0,
            count_at_start: 0,
        }
    }

    /// Format file path for a configuration.
    pub fn format_file(&self, config: &CameraConfig) -> PathBuf {
        self.format_dir
            .join(format_file_name(&config.model, config.bit_depth, config.roi_shape))
    }

    fn require_open(&self) -> Result<(), CameraError> {
        if self.opened {
            Ok(())
        } else {
            Err(CameraError::NotOpen)
        }
    }

    fn check(operation: &'static str, code: i32) -> Result<(), CameraError> {
        if code == STATUS_OK {
            Ok(())
        } else {
            Err(CameraError::Driver { operation, code })
        }
    }
}

impl<D: GrabberDriver> Camera for FrameGrabberCamera<D> {
    fn name(&self) -> &str {
        "Frame grabber"
    }

    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        config.validate()?;
        if self.opened {
            self.close();
        }

        let format_file = self.format_file(config);
        if !format_file.is_file() {
            return Err(CameraError::Open(format!(
                "Frame grabber can't find format file {}",
                format_file.display()
            )));
        }

        match self.driver.open(&format_file) {
            STATUS_OK => {}
            STATUS_FORMAT_FILE_MISSING => {
                return Err(CameraError::Open(format!(
                    "Frame grabber can't find format file {}",
                    format_file.display()
                )))
            }
            STATUS_ALREADY_OPEN => {
                return Err(CameraError::Open("Frame grabber is already open".into()))
            }
            code => {
                return Err(CameraError::Open(format!(
                    "Opening the frame grabber failed with error code {code}"
                )))
            }
        }

        self.opened = true;
        self.depth = 0;
        self.config = CameraConfig {
            roi_pos: (0, 0),
            exposure_ms: 0.0,
            frame_time_ms: 0.0,
            ..config.clone()
        };
        tracing::info!(format_file = %format_file.display(), "Frame grabber opened");
        Ok(())
    }

    fn close(&mut self) {
        if !self.opened {
            return;
        }
        match self.driver.close() {
            STATUS_OK => tracing::info!("Frame grabber closed"),
            code => tracing::warn!(code, "Closing the frame grabber failed"),
        }
        self.opened = false;
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn config(&self) -> &CameraConfig {
        &self.config
    }

    fn get_image(&mut self, index: Option<usize>) -> Result<Frame, CameraError> {
        self.require_open()?;
        let buffer = match index {
            Some(i) => {
                if self.depth > 0 && (i == 0 || i > self.depth) {
                    return Err(CameraError::InvalidIndex {
                        index: i,
                        capacity: self.depth,
                    });
                }
                i
            }
            None => self.driver.captured_buffer().max(1),
        };

        let (width, height, bits) = self.driver.image_dims();
        let n = width as usize * height as usize;
        let frame = if bits > 8 {
            let mut data = vec![0u16; n];
            Self::check("read", self.driver.read_u16(buffer, &mut data))?;
            Frame::from_raw_u16(width, height, bits, data)
        } else {
            let mut data = vec![0u8; n];
            Self::check("read", self.driver.read_u8(buffer, &mut data))?;
            Frame::from_u8(width, height, data)
        };
        frame.ok_or_else(|| {
            CameraError::Open(format!("driver reported unusable geometry {width}x{height} @ {bits} bit"))
        })
    }

    fn get_frame_number(&mut self) -> usize {
        if self.opened {
            self.driver.captured_buffer()
        } else {
            0
        }
    }

    fn start_continuous_capture(&mut self, buffer_depth: usize) -> Result<(), CameraError> {
        self.require_open()?;
        let depth = buffer_depth.max(1);
        self.count_at_start = self.driver.captured_count();
        Self::check("go live", self.driver.go_live_seq(1, depth, 0))?;
        self.depth = depth;
        tracing::debug!(depth, "Frame grabber live");
        Ok(())
    }

    fn start_sequence_capture(&mut self, n_frames: usize) -> Result<(), CameraError> {
        self.require_open()?;
        let n = n_frames.max(1);
        self.count_at_start = self.driver.captured_count();
        Self::check("sequence capture", self.driver.go_live_seq(1, n, n))?;
        self.depth = n;
        tracing::debug!(n_frames = n, "Frame grabber sequence capture started");
        Ok(())
    }

    fn stop_live_capture(&mut self) -> Result<(), CameraError> {
        self.require_open()?;
        Self::check("stop", self.driver.go_unlive())
    }

    fn finished_live_sequence(&mut self) -> bool {
        self.opened && !self.driver.gone_live()
    }

    fn buffer_status(&mut self) -> BufferStatus {
        if !self.opened {
            return BufferStatus::default();
        }
        let captured = self.driver.captured_count().saturating_sub(self.count_at_start);
        BufferStatus {
            capacity: self.depth,
            head: self.driver.captured_buffer(),
            filled: (captured as usize).min(self.depth),
        }
    }
}

impl<D: GrabberDriver> Drop for FrameGrabberCamera<D> {
    fn drop(&mut self) {
        self.close();
    }
}
