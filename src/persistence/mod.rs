//! Writing images, metadata and series to disk.
//!
//! Nothing here overwrites: every file is opened with `create_new`, and an existing
//! target is reported as [`AppError::FilenameCollision`]. Only the last directory level
//! is created; a missing parent is [`AppError::DirectoryMissing`].

#[cfg(feature = "storage_hdf5")]
pub mod hdf5;
pub mod series;
pub mod tiff;

pub use series::{compress_container, save_series, CompressionHandle, SeriesPaths};

use crate::camera::{Frame, Pixels};
use crate::error::{AppError, AppResult};
use crate::metadata::Metadata;
use ::tiff::encoder::Compression;
use image::{ImageBuffer, ImageFormat, Luma};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;
use tracing::{debug, info};

/// Create `dir` if needed. Only the final component may be missing.
pub fn ensure_directory(dir: &Path) -> AppResult<()> {
    if dir.is_dir() {
        return Ok(());
    }
    match dir.parent() {
        Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => {
            std::fs::create_dir(dir).or_else(|e| {
                if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() {
                    Ok(())
                } else {
                    Err(e)
                }
            })?;
            debug!(dir = %dir.display(), "Created data directory");
            Ok(())
        }
        _ => Err(AppError::DirectoryMissing(dir.to_path_buf())),
    }
}

/// Open a new file for writing, refusing to touch an existing one.
pub fn create_new(path: &Path) -> AppResult<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => AppError::FilenameCollision(path.to_path_buf()),
            _ => AppError::Io(e),
        })
}

/// Write frames as a new TIFF file.
pub fn write_tiff_file(
    path: &Path,
    frames: &[Frame],
    description: Option<&str>,
    compression: Compression,
) -> AppResult<()> {
    let mut writer = BufWriter::new(create_new(path)?);
    tiff::write_pages(&mut writer, frames, description, compression)?;
    writer.flush()?;
    Ok(())
}

/// Save one image. TIFF files carry `metadata` as JSON in their description tag; PNG
/// files carry none.
pub fn save_image(path: &Path, frame: &Frame, metadata: &Metadata) -> AppResult<()> {
    if path.exists() {
        return Err(AppError::FilenameCollision(path.to_path_buf()));
    }
    if let Some(dir) = path.parent() {
        ensure_directory(dir)?;
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => write_png(path, frame)?,
        _ => {
            let description = metadata.to_json()?;
            write_tiff_file(path, std::slice::from_ref(frame), Some(&description), tiff::RAW)?;
        }
    }
    info!(path = %path.display(), width = frame.width, height = frame.height, "Saved image");
    Ok(())
}

fn write_png(path: &Path, frame: &Frame) -> AppResult<()> {
    let mut writer = BufWriter::new(create_new(path)?);
    let size_error =
        || AppError::InvalidInput(format!("frame buffer does not match {}x{}", frame.width, frame.height));
    match frame.pixels() {
        Pixels::U8(data) => {
            ImageBuffer::<Luma<u8>, _>::from_raw(frame.width, frame.height, data.as_slice())
                .ok_or_else(size_error)?
                .write_to(&mut writer, ImageFormat::Png)?
        }
        Pixels::U16(data) => {
            ImageBuffer::<Luma<u16>, _>::from_raw(frame.width, frame.height, data.as_slice())
                .ok_or_else(size_error)?
                .write_to(&mut writer, ImageFormat::Png)?
        }
    }
    writer.flush()?;
    Ok(())
}

/// Write the YAML sidecar on its own.
pub fn save_metadata(path: &Path, metadata: &Metadata) -> AppResult<()> {
    if let Some(dir) = path.parent() {
        ensure_directory(dir)?;
    }
    let mut file = create_new(path)?;
    file.write_all(metadata.to_yaml()?.as_bytes())?;
    info!(path = %path.display(), "Saved metadata");
    Ok(())
}

/// Metadata embedded in a saved TIFF, if any.
pub fn read_tiff_metadata(path: &Path) -> AppResult<Option<Metadata>> {
    let reader = BufReader::new(File::open(path)?);
    match tiff::read_description(reader)? {
        Some(text) => Ok(Some(Metadata::from_json(&text)?)),
        None => Ok(None),
    }
}
