//! Time series output: thumbnail, raw container, and out-of-band compaction.
//!
//! For a thumbnail `<dir>/<stem>.<ext>` the series writes
//! - `<dir>/<stem>.uncompressed.tif` (or `.uncompressed.h5` with `storage_hdf5`): every
//!   frame, uncompressed, in capture order
//! - `<dir>/<stem>.stack.tif` (or `<stem>.h5`): the compressed stack produced by a
//!   background worker, which then removes the raw container

use super::{ensure_directory, save_image, write_tiff_file};
use crate::camera::Frame;
use crate::error::{AppError, AppResult};
use crate::metadata::Metadata;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

const RAW_MARKER: &str = ".uncompressed";

#[cfg(feature = "storage_hdf5")]
const CONTAINER_EXT: &str = "h5";
#[cfg(not(feature = "storage_hdf5"))]
const CONTAINER_EXT: &str = "tif";

/// Files produced by one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesPaths {
    /// Representative image with embedded metadata
    pub thumbnail: PathBuf,
    /// Uncompressed container, removed after compaction
    pub container: PathBuf,
    /// Compressed stack
    pub output: PathBuf,
}

impl SeriesPaths {
    /// Derive the container and output names from the thumbnail path.
    pub fn for_thumbnail(thumbnail: &Path) -> Self {
        let container = thumbnail.with_extension(format!("uncompressed.{CONTAINER_EXT}"));
        let output = compressed_path(&container).unwrap_or_else(|| container.clone());
        Self {
            thumbnail: thumbnail.to_path_buf(),
            container,
            output,
        }
    }

    fn existing(&self) -> Option<&Path> {
        [&self.thumbnail, &self.container, &self.output]
            .into_iter()
            .find(|p| p.exists())
            .map(PathBuf::as_path)
    }
}

/// Output path for a raw container, or `None` if the name is not `<stem>.uncompressed.<ext>`.
pub fn compressed_path(container: &Path) -> Option<PathBuf> {
    let name = container.file_name()?.to_str()?;
    let (stem, ext) = name.rsplit_once('.')?;
    let stem = stem.strip_suffix(RAW_MARKER)?;
    let out = match ext {
        "tif" => format!("{stem}.stack.tif"),
        "h5" => format!("{stem}.h5"),
        _ => return None,
    };
    Some(container.with_file_name(out))
}

/// Completion signal of a background compaction.
#[derive(Debug)]
pub struct CompressionHandle {
    paths: SeriesPaths,
    rx: Receiver<AppResult<PathBuf>>,
    worker: Option<JoinHandle<()>>,
}

impl CompressionHandle {
    /// Files of the series being compacted.
    pub fn paths(&self) -> &SeriesPaths {
        &self.paths
    }

    /// `None` while the worker is still running.
    pub fn try_result(&mut self) -> Option<AppResult<PathBuf>> {
        match self.rx.try_recv() {
            Ok(result) => {
                self.join();
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.join();
                Some(Err(AppError::Compression(
                    "compression worker exited without reporting".to_string(),
                )))
            }
        }
    }

    /// Block until the worker finishes.
    pub fn wait(mut self) -> AppResult<PathBuf> {
        let result = self.rx.recv().unwrap_or_else(|_| {
            Err(AppError::Compression(
                "compression worker exited without reporting".to_string(),
            ))
        });
        self.join();
        result
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(container = %self.paths.container.display(), "Compression worker panicked");
            }
        }
    }
}

/// Write a series and start compacting it in the background.
///
/// The first frame becomes the thumbnail (with metadata embedded when it is a TIFF).
/// Nothing is written if any of the series files already exist.
pub fn save_series(
    thumbnail: &Path,
    frames: &[Frame],
    metadata: &Metadata,
) -> AppResult<CompressionHandle> {
    let first = frames
        .first()
        .ok_or_else(|| AppError::InvalidInput("a series needs at least one frame".to_string()))?;
    let paths = SeriesPaths::for_thumbnail(thumbnail);
    if let Some(existing) = paths.existing() {
        return Err(AppError::FilenameCollision(existing.to_path_buf()));
    }
    if let Some(dir) = thumbnail.parent() {
        ensure_directory(dir)?;
    }

    save_image(&paths.thumbnail, first, metadata)?;
    write_container(&paths.container, frames)?;
    info!(
        container = %paths.container.display(),
        frames = frames.len(),
        "Wrote raw series container"
    );

    let (tx, rx) = mpsc::channel();
    let container = paths.container.clone();
    let worker = std::thread::Builder::new()
        .name("series-compress".to_string())
        .spawn(move || {
            let result = compress_container(&container, false);
            if let Err(err) = &result {
                warn!(container = %container.display(), error = %err, "Series compression failed");
            }
            let _ = tx.send(result);
        })?;

    Ok(CompressionHandle {
        paths,
        rx,
        worker: Some(worker),
    })
}

#[cfg(not(feature = "storage_hdf5"))]
fn write_container(path: &Path, frames: &[Frame]) -> AppResult<()> {
    write_tiff_file(path, frames, None, super::tiff::RAW)
}

#[cfg(feature = "storage_hdf5")]
fn write_container(path: &Path, frames: &[Frame]) -> AppResult<()> {
    if path.exists() {
        return Err(AppError::FilenameCollision(path.to_path_buf()));
    }
    super::hdf5::write_raw_container(path, frames)
}

/// Compact a raw series container into its compressed stack.
///
/// The container is deleted afterwards unless `keep` is set. Returns the output path.
pub fn compress_container(container: &Path, keep: bool) -> AppResult<PathBuf> {
    let output = compressed_path(container).ok_or_else(|| {
        AppError::InvalidInput(format!(
            "{} should be named <name>{RAW_MARKER}.tif or <name>{RAW_MARKER}.h5",
            container.display()
        ))
    })?;
    if output.exists() {
        return Err(AppError::FilenameCollision(output));
    }

    let frames = match container.extension().and_then(|e| e.to_str()) {
        Some("h5") => compact_hdf5(container, &output)?,
        _ => {
            let reader = std::io::BufReader::new(std::fs::File::open(container)?);
            let frames = super::tiff::read_pages(reader)?;
            write_tiff_file(&output, &frames, None, super::tiff::STACK)?;
            frames.len()
        }
    };

    if !keep {
        std::fs::remove_file(container)?;
    }
    info!(output = %output.display(), frames, kept = keep, "Compressed series");
    Ok(output)
}

#[cfg(feature = "storage_hdf5")]
fn compact_hdf5(container: &Path, output: &Path) -> AppResult<usize> {
    super::hdf5::compact(container, output)
}

#[cfg(not(feature = "storage_hdf5"))]
fn compact_hdf5(_container: &Path, _output: &Path) -> AppResult<usize> {
    Err(AppError::FeatureNotEnabled("storage_hdf5".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn compressed_names() {
        assert_eq!(
            compressed_path(Path::new("/d/run.uncompressed.tif")),
            Some(PathBuf::from("/d/run.stack.tif"))
        );
        assert_eq!(
            compressed_path(Path::new("/d/run.uncompressed.h5")),
            Some(PathBuf::from("/d/run.h5"))
        );
        assert_eq!(compressed_path(Path::new("/d/run.tif")), None);
    }

    #[test]
    fn paths_follow_the_thumbnail() {
        let paths = SeriesPaths::for_thumbnail(Path::new("/data/00/image0000.tif"));
        assert_eq!(
            paths.container,
            PathBuf::from(format!("/data/00/image0000.uncompressed.{CONTAINER_EXT}"))
        );
        assert_ne!(paths.output, paths.container);
    }

    #[test]
    fn empty_series_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = save_series(&dir.path().join("a.tif"), &[], &Metadata::default()).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn bad_container_name_is_rejected() {
        let err = compress_container(Path::new("/tmp/not-a-series.tif"), true).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[cfg(not(feature = "storage_hdf5"))]
    #[test]
    fn series_is_compacted_in_the_background() {
        let dir = TempDir::new().unwrap();
        let thumb = dir.path().join("00").join("image0000.tif");
        let frames: Vec<Frame> = (0..5).map(|k| Frame::filled_u8(8, 4, k * 10)).collect();

        let handle = save_series(&thumb, &frames, &Metadata::default()).unwrap();
        let container = handle.paths().container.clone();
        let output = handle.wait().unwrap();

        assert!(thumb.exists());
        assert!(!container.exists());
        let reader = std::io::BufReader::new(std::fs::File::open(&output).unwrap());
        assert_eq!(super::super::tiff::read_pages(reader).unwrap(), frames);
    }

    #[cfg(not(feature = "storage_hdf5"))]
    #[test]
    fn keep_leaves_the_container() {
        let dir = TempDir::new().unwrap();
        let container = dir.path().join("s.uncompressed.tif");
        write_tiff_file(
            &container,
            &[Frame::filled_u8(2, 2, 1)],
            None,
            crate::persistence::tiff::RAW,
        )
        .unwrap();

        let out = compress_container(&container, true).unwrap();
        assert!(container.exists());
        assert_eq!(out, dir.path().join("s.stack.tif"));
        assert!(matches!(
            compress_container(&container, true),
            Err(AppError::FilenameCollision(_))
        ));
    }
}
