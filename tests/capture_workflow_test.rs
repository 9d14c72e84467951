//! End-to-end capture flows against the simulated camera.

use camera_controller::camera::{self, Camera, CameraBackend, CameraConfig, SimulatedCamera};
use camera_controller::capture::{CaptureController, CaptureEvent, ViewMode};
use camera_controller::config::{AppConfig, CameraSettings};
use camera_controller::error::AppError;
use camera_controller::metadata::MetadataBuilder;
use camera_controller::persistence::{read_tiff_metadata, tiff::read_pages};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn controller(root: &Path, buffer_depth: usize) -> CaptureController {
    let mut config = AppConfig::default();
    config.saving.root_directory = root.to_path_buf();
    config.saving.save_metadata_sidecar = true;
    config.camera.buffer_depth = buffer_depth;
    config.capture.preview_size = 64;

    let mut cam = SimulatedCamera::with_seed(42);
    cam.open(&CameraConfig {
        roi_shape: (32, 24),
        ..CameraConfig::default()
    })
    .unwrap();
    CaptureController::new(Box::new(cam), &config)
}

fn saved_paths(events: &[CaptureEvent]) -> Vec<std::path::PathBuf> {
    events
        .iter()
        .filter_map(|e| match e {
            CaptureEvent::ImageSaved(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

fn checksum(path: &Path) -> Vec<u8> {
    Sha256::digest(std::fs::read(path).unwrap()).to_vec()
}

#[test]
fn test_default_layout_and_counter_progression() {
    let root = TempDir::new().unwrap();
    let mut c = controller(root.path(), 10);

    let mut written = Vec::new();
    for _ in 0..4 {
        c.request_save().unwrap();
        written.extend(saved_paths(&c.tick(Instant::now()).events));
    }

    let dir = root.path().join("00");
    assert_eq!(written[0], dir.join("image0000.tif"));
    assert_eq!(written[3], dir.join("image0003.tif"));
    assert!(dir.join("image0003.yaml").exists());
    assert_eq!(c.naming.dir_counter.value, 0);
}

#[test]
fn test_collision_leaves_existing_file_untouched() {
    let root = TempDir::new().unwrap();
    let mut c = controller(root.path(), 10);
    let target = root.path().join("00").join("image0000.tif");
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(&target, b"previous experiment").unwrap();
    let before = checksum(&target);

    assert!(c.naming.preview(chrono::Local::now().naive_local()).collides);
    c.request_save().unwrap();
    let report = c.tick(Instant::now());

    assert!(matches!(
        &report.events[..],
        [CaptureEvent::SaveFailed(AppError::FilenameCollision(p))] if *p == target
    ));
    assert_eq!(checksum(&target), before);
    assert!(c.has_held_save());
    assert_eq!(c.naming.image_counter.value, 0);

    // moving the counter on lets the held frame through
    c.naming.image_counter.value = 1;
    let path = c.retry_save().unwrap();
    assert_eq!(path, root.path().join("00").join("image0001.tif"));
    assert_eq!(checksum(&target), before);
}

#[test]
fn test_tiff_description_round_trip() {
    let root = TempDir::new().unwrap();
    let mut c = controller(root.path(), 10);
    c.metadata = MetadataBuilder::new()
        .microscope("Uberscope")
        .light("White, brightfield illumination")
        .objective("Nikon 100x Oil Immersion")
        .notes("cells, day 3")
        .build();

    c.request_save().unwrap();
    let path = saved_paths(&c.tick(Instant::now()).events).remove(0);

    let stored = read_tiff_metadata(&path).unwrap().unwrap();
    assert_eq!(stored, c.metadata);
    assert_eq!(stored.to_json().unwrap(), c.metadata.to_json().unwrap());
    assert_eq!(stored.magnification(), Some(100.0));
}

#[test]
fn test_fast_series_writes_n_frames_and_restores_live() {
    let root = TempDir::new().unwrap();
    let mut c = controller(root.path(), 10);
    let t0 = Instant::now();
    c.start_fast_series(7, t0).unwrap();

    let mut ticks = 0;
    while !c.trigger().is_idle() {
        let report = c.tick(t0);
        ticks += 1;
        assert!(ticks <= 7, "series did not finish after its 7th frame");
        if ticks < 7 {
            assert!(!report
                .events
                .iter()
                .any(|e| matches!(e, CaptureEvent::SeriesSaved { .. })));
        }
    }
    assert_eq!(ticks, 7);
    assert_eq!(c.mode(), ViewMode::Live);

    let stacks = c.wait_for_compressions();
    let stack = stacks.into_iter().next().unwrap().unwrap();
    let frames = read_pages(File::open(&stack).unwrap()).unwrap();
    assert_eq!(frames.len(), 7);

    let thumb = root.path().join("00").join("image0000.tif");
    assert!(thumb.exists());
    assert!(root.path().join("00").join("image0000.yaml").exists());
    assert_eq!(read_pages(File::open(&thumb).unwrap()).unwrap()[0], frames[0]);
    // the next save lands in a fresh directory
    assert_eq!(c.naming.dir_counter.value, 1);
}

#[test]
fn test_singles_then_series_never_reuse_a_name() {
    let root = TempDir::new().unwrap();
    let mut c = controller(root.path(), 10);
    let t0 = Instant::now();
    let mut events = Vec::new();

    for _ in 0..2 {
        c.request_save().unwrap();
        events.extend(c.tick(t0).events);
    }
    c.start_fast_series(2, t0).unwrap();
    while !c.trigger().is_idle() {
        events.extend(c.tick(t0).events);
    }
    c.start_slow_series(2, Duration::ZERO, t0).unwrap();
    while !c.trigger().is_idle() {
        events.extend(c.tick(t0).events);
    }

    assert!(!events
        .iter()
        .any(|e| matches!(e, CaptureEvent::SaveFailed(_))));
    let thumbnail = events.iter().find_map(|e| match e {
        CaptureEvent::SeriesSaved { thumbnail, .. } => Some(thumbnail.clone()),
        _ => None,
    });
    assert_eq!(thumbnail, Some(root.path().join("01").join("image0000.tif")));
    assert_eq!(
        saved_paths(&events),
        vec![
            root.path().join("00").join("image0000.tif"),
            root.path().join("00").join("image0001.tif"),
            root.path().join("02").join("image0000.tif"),
            root.path().join("02").join("image0001.tif"),
        ]
    );
    assert!(c.wait_for_compressions().iter().all(Result::is_ok));
}

#[test]
fn test_buffer_dump_covers_the_whole_ring_oldest_first() {
    let root = TempDir::new().unwrap();
    let depth = 5;
    let mut c = controller(root.path(), depth);

    let mut shown = Vec::new();
    for _ in 0..12 {
        c.tick(Instant::now());
        shown.push(c.last_frame().cloned().unwrap());
    }
    c.set_live(false).unwrap();
    c.start_buffer_dump().unwrap();
    c.tick(Instant::now());

    let stack = c.wait_for_compressions().remove(0).unwrap();
    let frames = read_pages(File::open(&stack).unwrap()).unwrap();
    assert_eq!(frames.len(), depth);
    assert_eq!(frames, shown[shown.len() - depth..].to_vec());
    // the dump always hands back a live view
    assert_eq!(c.mode(), ViewMode::Live);
}

#[test]
fn test_unavailable_hardware_falls_back() {
    let settings = CameraSettings::default();
    for backend in [CameraBackend::FrameGrabber, CameraBackend::Usb] {
        let (cam, err) = camera::connect(backend, &settings);
        if err.is_some() {
            assert_eq!(cam.name(), "Simulated");
            assert!(cam.is_open());
        }
    }
}
