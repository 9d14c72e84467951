//! Image frames as delivered by a camera backend.

/// Pixel storage for one frame, row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    /// 8-bit samples.
    U8(Vec<u8>),
    /// 16-bit samples, upper-bits-justified so that the maximum sensor value reads as white.
    U16(Vec<u16>),
}

/// Represents a single captured frame.
///
/// Frames are never mutated after capture. Display processing works on copies.
///
/// # Storage
/// - 8-bit sensors: one `u8` per pixel.
/// - 10/12/16-bit sensors: one `u16` per pixel, shifted left by `16 - bit_depth`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Bits per pixel the sensor produced (8, 10, 12 or 16)
    pub bit_depth: u8,

    pixels: Pixels,
}

impl Frame {
    /// Create a new frame from 8-bit pixel data.
    ///
    /// Returns `None` if the buffer does not hold exactly `width * height` samples.
    pub fn from_u8(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == pixel_count(width, height)).then_some(Self {
            width,
            height,
            bit_depth: 8,
            pixels: Pixels::U8(data),
        })
    }

    /// Create a frame from samples that already use the full 16-bit range.
    pub fn from_u16(width: u32, height: u32, data: Vec<u16>) -> Option<Self> {
        Self::from_raw_u16(width, height, 16, data)
    }

    /// Create a frame from right-aligned `bit_depth` samples, justifying them to the top
    /// of the 16-bit range.
    pub fn from_raw_u16(width: u32, height: u32, bit_depth: u8, mut data: Vec<u16>) -> Option<Self> {
        if data.len() != pixel_count(width, height) || !(9..=16).contains(&bit_depth) {
            return None;
        }
        let shift = 16 - u32::from(bit_depth);
        if shift > 0 {
            for px in &mut data {
                *px = px.wrapping_shl(shift);
            }
        }
        Some(Self {
            width,
            height,
            bit_depth,
            pixels: Pixels::U16(data),
        })
    }

    /// A frame filled with one value, mostly useful for backgrounds and tests.
    pub fn filled_u8(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            bit_depth: 8,
            pixels: Pixels::U8(vec![value; pixel_count(width, height)]),
        }
    }

    /// Borrow the pixel storage.
    pub fn pixels(&self) -> &Pixels {
        &self.pixels
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        pixel_count(self.width, self.height)
    }

    /// True for a zero-sized frame.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether samples are stored as 16-bit.
    pub fn is_wide(&self) -> bool {
        matches!(self.pixels, Pixels::U16(_))
    }

    /// Get pixel value at (x, y).
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.width as usize + x as usize;
        match &self.pixels {
            Pixels::U8(data) => data.get(idx).map(|&v| u16::from(v)),
            Pixels::U16(data) => data.get(idx).copied(),
        }
    }

    /// Iterate samples as `f32`, in storage order.
    pub fn samples(&self) -> Box<dyn Iterator<Item = f32> + '_> {
        match &self.pixels {
            Pixels::U8(data) => Box::new(data.iter().map(|&v| f32::from(v))),
            Pixels::U16(data) => Box::new(data.iter().map(|&v| f32::from(v))),
        }
    }

    /// Largest sample value, in storage units.
    pub fn max_value(&self) -> u16 {
        match &self.pixels {
            Pixels::U8(data) => data.iter().copied().max().map_or(0, u16::from),
            Pixels::U16(data) => data.iter().copied().max().unwrap_or(0),
        }
    }

    /// 8-bit samples, if this frame stores them.
    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.pixels {
            Pixels::U8(data) => Some(data),
            Pixels::U16(_) => None,
        }
    }

    /// 16-bit samples, if this frame stores them.
    pub fn as_u16(&self) -> Option<&[u16]> {
        match &self.pixels {
            Pixels::U16(data) => Some(data),
            Pixels::U8(_) => None,
        }
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}
