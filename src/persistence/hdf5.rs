//! HDF5 series containers.
//!
//! The raw container holds one 2D dataset per frame, named by its index ("0", "1", ...).
//! Compaction stacks them into a single `images` dataset of shape (rows, cols, n),
//! gzip compressed.

use crate::camera::{Frame, Pixels};
use crate::error::{AppError, AppResult};
use hdf5::{File, H5Type};
use std::path::Path;

/// Dataset holding the compacted stack.
pub const STACK_DATASET: &str = "images";

const GZIP_LEVEL: u8 = 4;
const MAX_CHUNK_XY: usize = 64;
const MAX_CHUNK_FRAMES: usize = 100;

/// Write frames into a new raw container. Fails if the file exists.
pub fn write_raw_container(path: &Path, frames: &[Frame]) -> AppResult<()> {
    let file = File::create_excl(path)?;
    for (index, frame) in frames.iter().enumerate() {
        let shape = (frame.height as usize, frame.width as usize);
        let name = index.to_string();
        match frame.pixels() {
            Pixels::U8(data) => file
                .new_dataset::<u8>()
                .shape(shape)
                .create(name.as_str())?
                .write_raw(data.as_slice())?,
            Pixels::U16(data) => file
                .new_dataset::<u16>()
                .shape(shape)
                .create(name.as_str())?
                .write_raw(data.as_slice())?,
        }
    }
    Ok(())
}

/// Stack every indexed dataset of `input` into `output`.
pub fn compact(input: &Path, output: &Path) -> AppResult<usize> {
    let inf = File::open(input)?;
    let count = inf.member_names()?.len();
    if count == 0 {
        return Err(AppError::Compression(format!(
            "{} holds no frames",
            input.display()
        )));
    }
    let first = inf.dataset("0")?;
    let outf = File::create_excl(output)?;
    if first.dtype()?.size() == 1 {
        stack::<u8>(&inf, &outf, count)?;
    } else {
        stack::<u16>(&inf, &outf, count)?;
    }
    Ok(count)
}

fn stack<T: H5Type + Copy + Default>(inf: &File, outf: &File, count: usize) -> AppResult<()> {
    let shape = inf.dataset("0")?.shape();
    let (rows, cols) = match shape.as_slice() {
        [rows, cols] => (*rows, *cols),
        other => {
            return Err(AppError::Compression(format!(
                "frame dataset has shape {other:?}, expected 2D"
            )))
        }
    };

    let mut stacked = vec![T::default(); rows * cols * count];
    for k in 0..count {
        let frame = inf.dataset(&k.to_string())?.read_raw::<T>()?;
        if frame.len() != rows * cols {
            return Err(AppError::Compression(format!(
                "frame {k} does not match the size of frame 0"
            )));
        }
        for (px, value) in frame.into_iter().enumerate() {
            stacked[px * count + k] = value;
        }
    }

    let chunk = (
        rows.min(MAX_CHUNK_XY).max(1),
        cols.min(MAX_CHUNK_XY).max(1),
        count.min(MAX_CHUNK_FRAMES),
    );
    outf.new_dataset::<T>()
        .chunk(chunk)
        .deflate(GZIP_LEVEL)
        .shape((rows, cols, count))
        .create(STACK_DATASET)?
        .write_raw(stacked.as_slice())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stack_has_frames_on_the_last_axis() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("s.uncompressed.h5");
        let out = dir.path().join("s.h5");
        let frames: Vec<Frame> = (0..3u8)
            .map(|k| Frame::from_u8(2, 2, vec![k, k + 10, k + 20, k + 30]).unwrap())
            .collect();
        write_raw_container(&raw, &frames).unwrap();
        assert_eq!(compact(&raw, &out).unwrap(), 3);

        let file = File::open(&out).unwrap();
        let ds = file.dataset(STACK_DATASET).unwrap();
        assert_eq!(ds.shape(), vec![2, 2, 3]);
        let data = ds.read_raw::<u8>().unwrap();
        // pixel (0,1) across the three frames
        assert_eq!(&data[3..6], &[10, 11, 12]);
    }
}
