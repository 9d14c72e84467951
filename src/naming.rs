//! Output path generation.
//!
//! Layout:
//!
//! ```text
//! root/[YYYY-MM-DD/][dir_counter][extra_dir_text]/[yymmdd_][HHMMSS_][text][image_counter].ext
//! ```
//!
//! Building a path never changes state. Counters only move through the `advance_*`
//! methods, which the capture controller calls after a write has succeeded.

use crate::config::SavingSettings;
use crate::error::{AppError, AppResult};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// Image extensions that can be written.
pub const SUPPORTED_EXTENSIONS: [&str; 2] = [".tif", ".png"];

/// Shown in place of the path preview when the next save would hit an existing file.
pub const OVERWRITE_WARNING: &str = "DANGER: SET TO OVERWRITE DATA...";

/// Minimum digits of the image counter.
pub const IMAGE_COUNTER_WIDTH: usize = 4;

/// Minimum digits of the directory counter.
pub const DIR_COUNTER_WIDTH: usize = 2;

const DATE_PREFIX: &str = "%y%m%d_";
const TIME_PREFIX: &str = "%H%M%S_";
const DATED_SUBDIR: &str = "%Y-%m-%d";

/// A value that can be switched in and out of the generated name without losing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toggle<T> {
    /// Whether the value takes part in the name
    pub enabled: bool,
    /// The value, kept while disabled
    pub value: T,
}

impl<T> Toggle<T> {
    /// Enabled toggle.
    pub fn on(value: T) -> Self {
        Self { enabled: true, value }
    }

    /// Disabled toggle.
    pub fn off(value: T) -> Self {
        Self {
            enabled: false,
            value,
        }
    }

    /// The value when enabled.
    pub fn get(&self) -> Option<&T> {
        self.enabled.then_some(&self.value)
    }
}

/// Parse a counter typed by the user ("0042" -> 42).
pub fn parse_counter(text: &str) -> AppResult<u32> {
    let trimmed = text.trim();
    trimmed
        .parse::<u32>()
        .map_err(|_| AppError::InvalidInput(format!("'{trimmed}' is not a counter value")))
}

/// Zero-padded counter text. Values wider than `width` are printed in full.
pub fn format_counter(value: u32, width: usize) -> String {
    format!("{value:0width$}")
}

/// Everything that determines where the next image is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameState {
    /// Root directory
    pub root_directory: PathBuf,
    /// Insert a `YYYY-MM-DD` subdirectory
    pub use_dated_subdir: bool,
    /// Numbered data directory
    pub dir_counter: Toggle<u32>,
    /// Text appended to the data directory name
    pub extra_dir_text: Toggle<String>,
    /// Prefix filenames with the date
    pub include_date: bool,
    /// Prefix filenames with the time
    pub include_time: bool,
    /// Free text in the filename
    pub filename_text: Toggle<String>,
    /// Per-image counter
    pub image_counter: Toggle<u32>,
    /// Extension including the dot
    pub extension: String,
    last_save_was_series: bool,
}

/// A computed output path and whether writing to it would collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPreview {
    /// Next image path
    pub path: PathBuf,
    /// A file already exists at `path`
    pub collides: bool,
}

impl PathPreview {
    /// Text for the path preview label.
    pub fn label(&self) -> String {
        if self.collides {
            OVERWRITE_WARNING.to_string()
        } else {
            self.path.display().to_string()
        }
    }
}

impl Default for FilenameState {
    fn default() -> Self {
        Self::from_settings(&SavingSettings::default())
    }
}

impl FilenameState {
    /// Initial state from configuration.
    pub fn from_settings(settings: &SavingSettings) -> Self {
        let mut state = Self {
            root_directory: settings.root_directory.clone(),
            use_dated_subdir: settings.use_dated_subdir,
            dir_counter: Toggle::on(0),
            extra_dir_text: Toggle::off(String::new()),
            include_date: false,
            include_time: false,
            filename_text: Toggle::on(settings.filename_text.clone()),
            image_counter: Toggle::on(0),
            extension: settings.extension.clone(),
            last_save_was_series: false,
        };
        if !SUPPORTED_EXTENSIONS.contains(&state.extension.as_str()) {
            state.extension = SUPPORTED_EXTENSIONS[0].to_string();
        }
        state
    }

    /// Restore filename options to their defaults. The root directory is kept.
    pub fn reset_to_defaults(&mut self) {
        let root = std::mem::take(&mut self.root_directory);
        let dated = self.use_dated_subdir;
        *self = Self::from_settings(&SavingSettings {
            root_directory: root,
            use_dated_subdir: dated,
            ..SavingSettings::default()
        });
    }

    /// Change the extension. Only `.tif` and `.png` are accepted.
    pub fn set_extension(&mut self, extension: &str) -> AppResult<()> {
        if !SUPPORTED_EXTENSIONS.contains(&extension) {
            return Err(AppError::InvalidInput(format!(
                "extension '{extension}' is not one of {}",
                SUPPORTED_EXTENSIONS.join(", ")
            )));
        }
        self.extension = extension.to_string();
        Ok(())
    }

    /// Directory the next image goes to.
    pub fn directory(&self, stamp: NaiveDateTime) -> PathBuf {
        let mut dir = self.root_directory.clone();
        if self.use_dated_subdir {
            dir.push(stamp.format(DATED_SUBDIR).to_string());
        }
        let mut leaf = String::new();
        if let Some(n) = self.dir_counter.get() {
            leaf.push_str(&format_counter(*n, DIR_COUNTER_WIDTH));
        }
        if let Some(text) = self.extra_dir_text.get() {
            leaf.push_str(text);
        }
        if !leaf.is_empty() {
            dir.push(leaf);
        }
        dir
    }

    /// File name of the next image.
    pub fn filename(&self, stamp: NaiveDateTime) -> String {
        let mut name = String::new();
        if self.include_date {
            name.push_str(&stamp.format(DATE_PREFIX).to_string());
        }
        if self.include_time {
            name.push_str(&stamp.format(TIME_PREFIX).to_string());
        }
        if let Some(text) = self.filename_text.get() {
            name.push_str(text);
        }
        if let Some(n) = self.image_counter.get() {
            name.push_str(&format_counter(*n, IMAGE_COUNTER_WIDTH));
        }
        name.push_str(&self.extension);
        name
    }

    /// Full path of the next image.
    pub fn path(&self, stamp: NaiveDateTime) -> PathBuf {
        self.directory(stamp).join(self.filename(stamp))
    }

    /// Next path plus a collision check against the filesystem.
    pub fn preview(&self, stamp: NaiveDateTime) -> PathPreview {
        let path = self.path(stamp);
        let collides = path.exists();
        PathPreview { path, collides }
    }

    /// Whether a slow series can give every frame its own name.
    pub fn names_are_unique_per_frame(&self) -> bool {
        self.image_counter.enabled || self.include_time
    }

    /// Counter update after a single image was written.
    pub fn advance_after_single(&mut self) -> AppResult<()> {
        if self.image_counter.enabled {
            self.image_counter.value = increment(self.image_counter.value, "image")?;
        } else if self.dir_counter.enabled {
            self.dir_counter.value = increment(self.dir_counter.value, "directory")?;
            self.image_counter.value = 0;
        }
        self.last_save_was_series = false;
        Ok(())
    }

    /// Prepare counters for a new series.
    ///
    /// After single saves the image counter restarts at zero in a fresh directory. With
    /// the directory counter off there is no fresh directory, so the running count is kept.
    pub fn begin_series(&mut self) -> AppResult<()> {
        if self.last_save_was_series {
            return Ok(());
        }
        let count_in_use = self.image_counter.enabled && self.image_counter.value > 0;
        if !count_in_use {
            self.image_counter.value = 0;
        } else if self.dir_counter.enabled {
            self.dir_counter.value = increment(self.dir_counter.value, "directory")?;
            self.image_counter.value = 0;
        }
        Ok(())
    }

    /// Counter update after one frame of a series was written.
    pub fn advance_within_series(&mut self) -> AppResult<()> {
        if self.image_counter.enabled {
            self.image_counter.value = increment(self.image_counter.value, "image")?;
        }
        Ok(())
    }

    /// Counter update after a whole series was written.
    pub fn advance_after_series(&mut self) -> AppResult<()> {
        if self.dir_counter.enabled {
            self.dir_counter.value = increment(self.dir_counter.value, "directory")?;
            self.image_counter.value = 0;
        } else if self.image_counter.enabled {
            self.image_counter.value = increment(self.image_counter.value, "image")?;
        }
        self.last_save_was_series = true;
        Ok(())
    }

    /// Counter update after a slow series, whose frames already advanced the image
    /// counter one by one.
    pub fn advance_after_slow_series(&mut self) -> AppResult<()> {
        if self.dir_counter.enabled {
            self.dir_counter.value = increment(self.dir_counter.value, "directory")?;
            self.image_counter.value = 0;
        }
        self.last_save_was_series = true;
        Ok(())
    }
}

fn increment(value: u32, counter: &str) -> AppResult<u32> {
    value.checked_add(1).ok_or_else(|| {
        AppError::InvalidInput(format!(
            "the {counter} counter is at its maximum ({value}); set a lower value"
        ))
    })
}

/// Metadata file that accompanies an image.
pub fn sidecar_path(image: &Path) -> PathBuf {
    image.with_extension("yaml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    fn state(root: &str) -> FilenameState {
        FilenameState::from_settings(&SavingSettings {
            root_directory: PathBuf::from(root),
            ..SavingSettings::default()
        })
    }

    #[test]
    fn default_layout() {
        let s = state("/data");
        assert_eq!(s.directory(stamp()), PathBuf::from("/data/00"));
        assert_eq!(s.path(stamp()), PathBuf::from("/data/00/image0000.tif"));
    }

    #[test]
    fn building_paths_does_not_change_state() {
        let s = state("/data");
        let before = s.clone();
        let _ = s.directory(stamp());
        let _ = s.path(stamp());
        let _ = s.preview(stamp());
        assert_eq!(s, before);
    }

    #[test]
    fn every_optional_field() {
        let mut s = state("/data");
        s.use_dated_subdir = true;
        s.dir_counter.value = 3;
        s.extra_dir_text = Toggle::on("_beads".into());
        s.include_date = true;
        s.include_time = true;
        s.filename_text = Toggle::on("run".into());
        s.image_counter.value = 12;
        s.set_extension(".png").unwrap();
        assert_eq!(
            s.path(stamp()),
            PathBuf::from("/data/2024-03-09/03_beads/240309_140507_run0012.png")
        );
    }

    #[test]
    fn no_counter_and_no_text_means_no_leaf_directory() {
        let mut s = state("/data");
        s.dir_counter.enabled = false;
        assert_eq!(s.directory(stamp()), PathBuf::from("/data"));
        s.extra_dir_text = Toggle::on("beads".into());
        assert_eq!(s.directory(stamp()), PathBuf::from("/data/beads"));
    }

    #[test]
    fn single_save_with_image_counter() {
        let mut s = state("/data");
        s.image_counter.value = 9999;
        s.advance_after_single().unwrap();
        assert_eq!(s.image_counter.value, 10000);
        assert_eq!(s.dir_counter.value, 0);
        assert_eq!(s.filename(stamp()), "image10000.tif");
    }

    #[test]
    fn single_save_without_image_counter_moves_directory() {
        let mut s = state("/data");
        s.image_counter = Toggle::off(5);
        s.advance_after_single().unwrap();
        assert_eq!(s.dir_counter.value, 1);
        assert_eq!(s.image_counter.value, 0);
    }

    #[test]
    fn series_after_single_saves_starts_a_fresh_directory() {
        let mut s = state("/data");
        s.image_counter.value = 7;
        s.advance_after_single().unwrap();
        s.begin_series().unwrap();
        assert_eq!((s.dir_counter.value, s.image_counter.value), (1, 0));
        assert_eq!(s.path(stamp()), PathBuf::from("/data/01/image0000.tif"));
        s.advance_within_series().unwrap();
        s.advance_within_series().unwrap();
        s.advance_after_series().unwrap();
        assert_eq!((s.dir_counter.value, s.image_counter.value), (2, 0));
    }

    #[test]
    fn series_in_an_unused_directory_stays_there() {
        let mut s = state("/data");
        s.begin_series().unwrap();
        assert_eq!(s.path(stamp()), PathBuf::from("/data/00/image0000.tif"));
    }

    #[test]
    fn series_after_single_saves_without_directory_counter_keeps_counting() {
        let mut s = state("/data");
        s.dir_counter.enabled = false;
        s.advance_after_single().unwrap();
        s.advance_after_single().unwrap();
        s.begin_series().unwrap();
        assert_eq!(s.filename(stamp()), "image0002.tif");
    }

    #[test]
    fn counters_at_the_limit_refuse_to_wrap() {
        let mut s = state("/data");
        s.image_counter.value = u32::MAX;
        assert!(matches!(s.advance_after_single(), Err(AppError::InvalidInput(_))));
        assert!(matches!(s.advance_within_series(), Err(AppError::InvalidInput(_))));
        assert_eq!(s.image_counter.value, u32::MAX);

        s.image_counter.enabled = false;
        s.dir_counter.value = u32::MAX;
        assert!(s.advance_after_single().is_err());
        assert!(s.advance_after_series().is_err());
        assert!(s.advance_after_slow_series().is_err());
        assert_eq!(s.dir_counter.value, u32::MAX);
        assert_eq!(parse_counter("4294967295").unwrap(), u32::MAX);
    }

    #[test]
    fn series_without_directory_counter_moves_image_counter() {
        let mut s = state("/data");
        s.dir_counter.enabled = false;
        s.begin_series().unwrap();
        s.advance_after_series().unwrap();
        assert_eq!(s.image_counter.value, 1);
        // consecutive series keep counting
        s.begin_series().unwrap();
        assert_eq!(s.image_counter.value, 1);
    }

    #[test]
    fn slow_series_only_moves_the_directory() {
        let mut s = state("/data");
        s.begin_series().unwrap();
        s.advance_within_series().unwrap();
        s.advance_within_series().unwrap();
        assert_eq!(s.filename(stamp()), "image0002.tif");
        s.advance_after_slow_series().unwrap();
        assert_eq!((s.dir_counter.value, s.image_counter.value), (1, 0));

        s.dir_counter.enabled = false;
        s.advance_within_series().unwrap();
        s.advance_after_slow_series().unwrap();
        assert_eq!(s.image_counter.value, 1);
    }

    #[test]
    fn counters_widen_instead_of_overflowing() {
        assert_eq!(format_counter(7, DIR_COUNTER_WIDTH), "07");
        assert_eq!(format_counter(123, DIR_COUNTER_WIDTH), "123");
        assert_eq!(format_counter(42, IMAGE_COUNTER_WIDTH), "0042");
    }

    #[test]
    fn counter_text_must_be_numeric() {
        assert_eq!(parse_counter(" 0042 ").unwrap(), 42);
        assert!(parse_counter("4x").is_err());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let mut s = state("/data");
        assert!(s.set_extension(".jpg").is_err());
        assert_eq!(s.extension, ".tif");
    }

    #[test]
    fn reset_keeps_root() {
        let mut s = state("/data");
        s.include_date = true;
        s.image_counter = Toggle::off(40);
        s.reset_to_defaults();
        assert_eq!(s.root_directory, PathBuf::from("/data"));
        assert!(!s.include_date);
        assert_eq!(s.image_counter, Toggle::on(0));
    }

    #[test]
    fn preview_flags_existing_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let s = state(dir.path().to_str().unwrap());
        let preview = s.preview(stamp());
        assert!(!preview.collides);
        std::fs::create_dir_all(preview.path.parent().unwrap()).unwrap();
        std::fs::write(&preview.path, b"x").unwrap();
        let preview = s.preview(stamp());
        assert!(preview.collides);
        assert_eq!(preview.label(), OVERWRITE_WARNING);
    }

    #[test]
    fn sidecar_replaces_extension() {
        assert_eq!(
            sidecar_path(Path::new("/data/00/image0000.tif")),
            PathBuf::from("/data/00/image0000.yaml")
        );
    }
}
