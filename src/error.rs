//! Custom error types for the application.
//!
//! Two enums cover everything that can go wrong:
//!
//! - **`CameraError`**: raised by camera backends. Opening failures (driver missing,
//!   format file missing, device already open elsewhere) are reported and the
//!   application falls back to the simulated camera.
//! - **`AppError`**: everything above the camera layer. Save-path errors
//!   (`FilenameCollision`, `DirectoryMissing`) are recoverable at the UI boundary: the
//!   frame is kept so the user can fix the settings and retry.
//!
//! `#[from]` conversions let the `?` operator lift I/O, codec, serialization and
//! configuration errors into `AppError`.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Failures reported by a camera backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Camera is not open")]
    NotOpen,

    #[error("Camera does not support {0}")]
    Unsupported(&'static str),

    #[error("Buffer index {index} is outside 1..={capacity}")]
    InvalidIndex { index: usize, capacity: usize },

    #[error("Camera driver returned error code {code} during {operation}")]
    Driver { operation: &'static str, code: i32 },

    #[error("Invalid camera configuration: {0}")]
    InvalidConfig(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

/// Application-level error.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("Overwriting data not allowed: {} already exists", .0.display())]
    FilenameCollision(PathBuf),

    #[error(
        "Directory {} does not exist. Only the final subdirectory is created; \
         create the parent path or choose an existing location",
        .0.display()
    )]
    DirectoryMissing(PathBuf),

    #[error("A capture is already in progress")]
    CaptureBusy,

    #[error("Sequence capture did not finish within {0:?}")]
    SequenceTimeout(std::time::Duration),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("Series compression failed: {0}")]
    Compression(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for AppError {
    fn from(value: figment::Error) -> Self {
        AppError::Config(Box::new(value))
    }
}

impl AppError {
    /// Whether the user can fix the situation and try again without restarting.
    pub fn can_recover(&self) -> bool {
        match self {
            AppError::FilenameCollision(_)
            | AppError::DirectoryMissing(_)
            | AppError::CaptureBusy
            | AppError::SequenceTimeout(_)
            | AppError::InvalidInput(_)
            | AppError::Io(_) => true,
            AppError::Camera(err) => !matches!(err, CameraError::FeatureNotEnabled(_)),
            AppError::Config(_)
            | AppError::Configuration(_)
            | AppError::FeatureNotEnabled(_) => false,
            AppError::Tiff(_)
            | AppError::Image(_)
            | AppError::Yaml(_)
            | AppError::Json(_)
            | AppError::Compression(_) => true,
            #[cfg(feature = "storage_hdf5")]
            AppError::Hdf5(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_message_names_the_file() {
        let err = AppError::FilenameCollision(PathBuf::from("/data/00/image0000.tif"));
        assert!(err.to_string().contains("/data/00/image0000.tif"));
        assert!(err.can_recover());
    }

    #[test]
    fn camera_errors_lift_into_app_errors() {
        fn open() -> AppResult<()> {
            Err(CameraError::Open("no driver".into()))?
        }
        let err = open().unwrap_err();
        assert!(matches!(err, AppError::Camera(CameraError::Open(_))));
        assert!(err.can_recover());
    }

    #[test]
    fn missing_feature_is_fatal() {
        let err: AppError = CameraError::FeatureNotEnabled("epix".into()).into();
        assert!(!err.can_recover());
        assert!(err.to_string().contains("--features epix"));
    }
}
