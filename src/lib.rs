//! # Camera Controller Core Library
//!
//! Live view, capture and archival of microscope camera frames. The library holds all
//! logic so that the native GUI (`main.rs`) is a thin shell and tests can drive the
//! complete capture flow headless.
//!
//! ## Crate Structure
//!
//! - **`camera`**: the `Camera` trait, frames, the rolling buffer and the simulated,
//!   frame grabber and USB backends (vendor drivers behind the `epix` / `thorlabs`
//!   features).
//! - **`capture`**: `CaptureController`, the Live/Frozen and save-trigger state machine
//!   driven by a periodic tick.
//! - **`config`**: layered configuration (`figment`): defaults, TOML file, `CAMCTL_`
//!   environment variables.
//! - **`error`**: `CameraError` and `AppError`.
//! - **`gui`**: the `eframe` front end.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`metadata`**: experiment metadata embedded in TIFFs and written as YAML sidecars.
//! - **`naming`**: output directory and filename generation with counters.
//! - **`persistence`**: image, metadata and series writers; series compression.
//! - **`pipeline`**: frame to preview conversion (background division, contrast).

pub mod camera;
pub mod capture;
pub mod config;
pub mod error;
pub mod gui;
pub mod logging;
pub mod metadata;
pub mod naming;
pub mod persistence;
pub mod pipeline;
