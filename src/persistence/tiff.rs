//! TIFF encoding and decoding of frames.

use crate::camera::{Frame, Pixels};
use crate::error::{AppError, AppResult};
use std::io::{Read, Seek, Write};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, compression::DeflateLevel, Compression, TiffEncoder};
use tiff::tags::Tag;

/// Compression used for single images and raw series containers.
pub const RAW: Compression = Compression::Uncompressed;

/// Compression used for compacted series stacks.
pub const STACK: Compression = Compression::Deflate(DeflateLevel::Balanced);

/// Write `frames` as consecutive pages. `description` goes into the first page's
/// ImageDescription tag.
pub fn write_pages<W: Write + Seek>(
    writer: W,
    frames: &[Frame],
    description: Option<&str>,
    compression: Compression,
) -> AppResult<()> {
    let mut encoder = TiffEncoder::new(writer)?.with_compression(compression);
    for (index, frame) in frames.iter().enumerate() {
        let description = if index == 0 { description } else { None };
        match frame.pixels() {
            Pixels::U8(data) => {
                let mut image =
                    encoder.new_image::<colortype::Gray8>(frame.width, frame.height)?;
                if let Some(text) = description {
                    image.encoder().write_tag(Tag::ImageDescription, text)?;
                }
                image.write_data(data)?;
            }
            Pixels::U16(data) => {
                let mut image =
                    encoder.new_image::<colortype::Gray16>(frame.width, frame.height)?;
                if let Some(text) = description {
                    image.encoder().write_tag(Tag::ImageDescription, text)?;
                }
                image.write_data(data)?;
            }
        }
    }
    Ok(())
}

/// ImageDescription of the first page, if present.
pub fn read_description<R: Read + Seek>(reader: R) -> AppResult<Option<String>> {
    let mut decoder = Decoder::new(reader)?;
    Ok(decoder
        .find_tag(Tag::ImageDescription)?
        .map(|value| value.into_string())
        .transpose()?)
}

/// Decode every page into frames. 16-bit pages come back as full-range 16-bit frames.
pub fn read_pages<R: Read + Seek>(reader: R) -> AppResult<Vec<Frame>> {
    let mut decoder = Decoder::new(reader)?;
    let mut frames = Vec::new();
    loop {
        let (width, height) = decoder.dimensions()?;
        let frame = match decoder.read_image()? {
            DecodingResult::U8(data) => Frame::from_u8(width, height, data),
            DecodingResult::U16(data) => Frame::from_u16(width, height, data),
            _ => {
                return Err(AppError::InvalidInput(
                    "only 8- and 16-bit grayscale TIFF pages are supported".to_string(),
                ))
            }
        };
        frames.push(frame.ok_or_else(|| {
            AppError::InvalidInput(format!("TIFF page {} has the wrong size", frames.len()))
        })?);
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn description_is_on_the_first_page_only() {
        let frames = vec![Frame::filled_u8(3, 2, 1), Frame::filled_u8(3, 2, 2)];
        let mut buf = Cursor::new(Vec::new());
        write_pages(&mut buf, &frames, Some("{\"a\":1}"), RAW).unwrap();

        buf.set_position(0);
        assert_eq!(read_description(&mut buf).unwrap().as_deref(), Some("{\"a\":1}"));
        buf.set_position(0);
        assert_eq!(read_pages(&mut buf).unwrap(), frames);
    }

    #[test]
    fn deflated_sixteen_bit_pages_decode() {
        let frame = Frame::from_raw_u16(4, 4, 12, (0..16).collect()).unwrap();
        let mut buf = Cursor::new(Vec::new());
        write_pages(&mut buf, &[frame.clone()], None, STACK).unwrap();

        buf.set_position(0);
        let pages = read_pages(&mut buf).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].as_u16(), frame.as_u16());
        buf.set_position(0);
        assert_eq!(read_description(&mut buf).unwrap(), None);
    }
}
