//! Frame to preview conversion.
//!
//! 1. Optional division by a background frame.
//! 2. Contrast bounds: observed min/max when autoscaling, user values otherwise.
//! 3. Bytescale into 8 bits.
//! 4. Grayscale replicated into RGBA, nearest-neighbour resized to the preview size.
//!
//! The source frame is only borrowed; nothing here mutates it.

use crate::camera::{Frame, Pixels};
use crate::error::AppResult;
use image::DynamicImage;
use std::path::Path;

/// User controls for the preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySettings {
    /// Divide by the background frame when one is loaded
    pub background_enabled: bool,
    /// Recompute contrast bounds from every frame
    pub autoscale: bool,
    /// Lower bound used when not autoscaling
    pub min: f32,
    /// Upper bound used when not autoscaling
    pub max: f32,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            background_enabled: false,
            autoscale: true,
            min: 0.0,
            max: 255.0,
        }
    }
}

/// Flat-field reference the live image is divided by.
///
/// Zero pixels are stored as 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Background {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl Background {
    /// Take the background from a captured frame.
    pub fn from_frame(frame: &Frame) -> Self {
        Self::from_values(frame.width, frame.height, frame.samples().collect())
    }

    /// Load a TIFF or PNG background from disk.
    pub fn load(path: &Path) -> AppResult<Self> {
        let img = image::open(path)?;
        let (width, height) = (img.width(), img.height());
        let values = match img {
            DynamicImage::ImageLuma8(buf) => buf.into_raw().into_iter().map(f32::from).collect(),
            other => other.into_luma16().into_raw().into_iter().map(f32::from).collect(),
        };
        tracing::info!(path = %path.display(), width, height, "Loaded background image");
        Ok(Self::from_values(width, height, values))
    }

    fn from_values(width: u32, height: u32, mut values: Vec<f32>) -> Self {
        for v in &mut values {
            if *v <= 0.0 {
                *v = 1.0;
            }
        }
        Self {
            width,
            height,
            values,
        }
    }

    /// Background dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn matches(&self, frame: &Frame) -> bool {
        self.width == frame.width && self.height == frame.height
    }
}

/// A rendered preview.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayImage {
    /// RGBA bytes, `width * height * 4`
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Contrast bounds actually used
    pub min: f32,
    pub max: f32,
    /// Background division took place
    pub background_applied: bool,
    /// A background was requested but its size differs from the frame
    pub background_mismatch: bool,
    /// Largest raw sample of the frame
    pub max_pixel: u16,
}

/// Map `value` into 0..=255: at or below `min` is black, at or above `max` is white.
pub fn bytescale(value: f32, min: f32, max: f32) -> u8 {
    if value <= min {
        0
    } else if value >= max {
        255
    } else {
        ((value - min) / (max - min) * 255.0).round() as u8
    }
}

/// Observed min/max of a sample set. Empty input gives `(0, 0)`.
pub fn bounds(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    values
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Values shown for `frame` after optional background division, plus whether division
/// was applied.
pub fn displayed_values(
    frame: &Frame,
    settings: &DisplaySettings,
    background: Option<&Background>,
) -> (Vec<f32>, bool) {
    let mut values: Vec<f32> = match frame.pixels() {
        Pixels::U8(data) => data.iter().map(|&v| f32::from(v)).collect(),
        Pixels::U16(data) => data.iter().map(|&v| f32::from(v)).collect(),
    };
    let bg = background.filter(|bg| settings.background_enabled && bg.matches(frame));
    if let Some(bg) = bg {
        for (v, b) in values.iter_mut().zip(&bg.values) {
            *v /= *b;
        }
    }
    (values, bg.is_some())
}

/// Render `frame` into a `preview_size` square RGBA preview.
///
/// A `preview_size` of 0 keeps the frame's own dimensions.
pub fn render(
    frame: &Frame,
    settings: &DisplaySettings,
    background: Option<&Background>,
    preview_size: u32,
) -> DisplayImage {
    let (values, background_applied) = displayed_values(frame, settings, background);
    let background_mismatch = settings.background_enabled
        && background.is_some_and(|bg| !bg.matches(frame));
    if background_mismatch {
        tracing::debug!(
            frame = ?(frame.width, frame.height),
            background = ?background.map(Background::dimensions),
            "Background size differs from frame, not applied"
        );
    }

    let (min, max) = if settings.autoscale {
        bounds(&values)
    } else {
        (settings.min, settings.max)
    };

    let (out_w, out_h) = if preview_size == 0 {
        (frame.width, frame.height)
    } else {
        (preview_size, preview_size)
    };

    let mut rgba = vec![255u8; out_w as usize * out_h as usize * 4];
    if frame.width > 0 && frame.height > 0 {
        let src_w = frame.width as usize;
        for y in 0..out_h as usize {
            let sy = y * frame.height as usize / out_h as usize;
            for x in 0..out_w as usize {
                let sx = x * src_w / out_w as usize;
                let gray = bytescale(values[sy * src_w + sx], min, max);
                let px = (y * out_w as usize + x) * 4;
                rgba[px] = gray;
                rgba[px + 1] = gray;
                rgba[px + 2] = gray;
            }
        }
    }

    DisplayImage {
        rgba,
        width: out_w,
        height: out_h,
        min,
        max,
        background_applied,
        background_mismatch,
        max_pixel: frame.max_value(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32) -> Frame {
        let data = (0..width * height).map(|i| (i % 256) as u8).collect();
        Frame::from_u8(width, height, data).unwrap()
    }

    #[test]
    fn bytescale_clips_and_interpolates() {
        assert_eq!(bytescale(-3.0, 0.0, 100.0), 0);
        assert_eq!(bytescale(0.0, 0.0, 100.0), 0);
        assert_eq!(bytescale(50.0, 0.0, 100.0), 128);
        assert_eq!(bytescale(100.0, 0.0, 100.0), 255);
        assert_eq!(bytescale(7.0, 5.0, 5.0), 255);
    }

    #[test]
    fn all_ones_background_is_identity() {
        let frame = ramp(16, 8);
        let ones = Background::from_frame(&Frame::filled_u8(16, 8, 1));
        let settings = DisplaySettings::default();
        let plain = render(&frame, &settings, None, 0);
        let divided = render(
            &frame,
            &DisplaySettings {
                background_enabled: true,
                ..settings
            },
            Some(&ones),
            0,
        );
        assert!(divided.background_applied);
        assert_eq!(plain.rgba, divided.rgba);
    }

    #[test]
    fn zero_background_pixels_do_not_divide_by_zero() {
        let frame = Frame::filled_u8(4, 4, 200);
        let bg = Background::from_frame(&Frame::filled_u8(4, 4, 0));
        let settings = DisplaySettings {
            background_enabled: true,
            ..DisplaySettings::default()
        };
        let (values, applied) = displayed_values(&frame, &settings, Some(&bg));
        assert!(applied);
        assert!(values.iter().all(|v| v.is_finite() && *v == 200.0));
    }

    #[test]
    fn mismatched_background_is_skipped() {
        let frame = ramp(8, 8);
        let bg = Background::from_frame(&Frame::filled_u8(4, 4, 2));
        let settings = DisplaySettings {
            background_enabled: true,
            ..DisplaySettings::default()
        };
        let out = render(&frame, &settings, Some(&bg), 0);
        assert!(!out.background_applied);
        assert!(out.background_mismatch);
    }

    #[test]
    fn manual_bounds_are_used_without_autoscale() {
        let frame = Frame::filled_u8(2, 2, 100);
        let settings = DisplaySettings {
            autoscale: false,
            min: 0.0,
            max: 200.0,
            ..DisplaySettings::default()
        };
        let out = render(&frame, &settings, None, 0);
        assert_eq!((out.min, out.max), (0.0, 200.0));
        assert_eq!(&out.rgba[..4], &[128, 128, 128, 255]);
    }

    #[test]
    fn preview_is_resized_and_frame_untouched() {
        let frame = ramp(10, 5);
        let copy = frame.clone();
        let out = render(&frame, &DisplaySettings::default(), None, 750);
        assert_eq!((out.width, out.height), (750, 750));
        assert_eq!(out.rgba.len(), 750 * 750 * 4);
        assert_eq!(out.max_pixel, 49);
        assert_eq!(frame, copy);
    }

    #[test]
    fn sixteen_bit_frames_autoscale() {
        let frame = Frame::from_raw_u16(2, 1, 12, vec![0, 0x0FFF]).unwrap();
        let out = render(&frame, &DisplaySettings::default(), None, 0);
        assert_eq!((out.min, out.max), (0.0, 65520.0));
        assert_eq!(out.rgba[0], 0);
        assert_eq!(out.rgba[4], 255);
    }
}
