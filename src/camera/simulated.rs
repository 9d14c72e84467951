//! Simulated camera producing uniform random frames.
//!
//! A new frame is generated each time the newest image is requested while live, so the
//! frame rate follows the caller's polling rate. Sequence capture stops producing after
//! the requested count, which makes the capture state machine testable end to end.

use super::{BufferStatus, Camera, CameraConfig, Frame, RollingBuffer};
use crate::error::CameraError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Development and fallback camera.
pub struct SimulatedCamera {
    config: CameraConfig,
    open: bool,
    live: bool,
    produced: usize,
    stop_after: Option<usize>,
    buffer: RollingBuffer,
    last: Frame,
    rng: StdRng,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCamera {
    /// Create a closed simulated camera seeded from the OS.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic frames for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            config: CameraConfig::default(),
            open: false,
            live: false,
            produced: 0,
            stop_after: None,
            buffer: RollingBuffer::new(1),
            last: Frame::filled_u8(1, 1, 0),
            rng,
        }
    }

    fn random_frame(&mut self) -> Frame {
        let (w, h) = self.config.roi_shape;
        let n = w as usize * h as usize;
        let depth = self.config.bit_depth;
        let frame = if depth <= 8 {
            let data: Vec<u8> = (0..n).map(|_| self.rng.gen()).collect();
            Frame::from_u8(w, h, data)
        } else {
            let top = 1u32 << depth;
            let data: Vec<u16> = (0..n)
                .map(|_| self.rng.gen_range(0..top) as u16)
                .collect();
            Frame::from_raw_u16(w, h, depth, data)
        };
        frame.unwrap_or_else(|| Frame::filled_u8(w, h, 0))
    }

    fn require_open(&self) -> Result<(), CameraError> {
        if self.open {
            Ok(())
        } else {
            Err(CameraError::NotOpen)
        }
    }

    fn arm(&mut self, depth: usize, stop_after: Option<usize>) {
        self.buffer = RollingBuffer::new(depth);
        self.produced = 0;
        self.stop_after = stop_after;
        self.live = true;
    }
}

impl Camera for SimulatedCamera {
    fn name(&self) -> &str {
        "Simulated"
    }

    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        config.validate()?;
        if self.open {
            self.close();
        }
        self.config = config.clone();
        self.last = self.random_frame();
        self.buffer = RollingBuffer::new(1);
        self.live = false;
        self.produced = 0;
        self.stop_after = None;
        self.open = true;
        tracing::debug!(roi = ?config.roi_shape, bit_depth = config.bit_depth, "Simulated camera opened");
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.live = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn config(&self) -> &CameraConfig {
        &self.config
    }

    fn get_image(&mut self, index: Option<usize>) -> Result<Frame, CameraError> {
        self.require_open()?;
        if let Some(index) = index {
            return self.buffer.get(index).cloned();
        }
        let can_produce = self.stop_after.map_or(true, |n| self.produced < n);
        if self.live && can_produce {
            let frame = self.random_frame();
            self.buffer.push(frame.clone());
            self.produced += 1;
            self.last = frame;
        }
        Ok(self.last.clone())
    }

    fn get_frame_number(&mut self) -> usize {
        self.buffer.status().head
    }

    fn start_continuous_capture(&mut self, buffer_depth: usize) -> Result<(), CameraError> {
        self.require_open()?;
        self.arm(buffer_depth, None);
        Ok(())
    }

    fn start_sequence_capture(&mut self, n_frames: usize) -> Result<(), CameraError> {
        self.require_open()?;
        self.arm(n_frames, Some(n_frames));
        Ok(())
    }

    fn stop_live_capture(&mut self) -> Result<(), CameraError> {
        self.live = false;
        Ok(())
    }

    fn finished_live_sequence(&mut self) -> bool {
        self.stop_after.is_some_and(|n| self.produced >= n)
    }

    fn buffer_status(&mut self) -> BufferStatus {
        self.buffer.status()
    }
}
