//! Criterion benchmarks for the preview path.
//!
//! Rendering runs once per tick (30 ms by default), so a full-size frame has to stay
//! well below that budget.
//!
//! Run with: cargo bench --bench display_pipeline

use camera_controller::camera::Frame;
use camera_controller::pipeline::{render, Background, DisplaySettings};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn frame_8bit(side: u32) -> Frame {
    let data = (0..side * side).map(|i| (i % 251) as u8).collect();
    Frame::from_u8(side, side, data).unwrap()
}

fn frame_12bit(side: u32) -> Frame {
    let data = (0..side * side).map(|i| (i % 4096) as u16).collect();
    Frame::from_raw_u16(side, side, 12, data).unwrap()
}

fn render_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");
    for side in [512u32, 1024, 2048] {
        group.throughput(Throughput::Elements(u64::from(side) * u64::from(side)));

        let frame = frame_8bit(side);
        group.bench_with_input(BenchmarkId::new("8bit_autoscale", side), &frame, |b, f| {
            b.iter(|| render(black_box(f), &DisplaySettings::default(), None, 750))
        });

        let frame = frame_12bit(side);
        group.bench_with_input(BenchmarkId::new("12bit_autoscale", side), &frame, |b, f| {
            b.iter(|| render(black_box(f), &DisplaySettings::default(), None, 750))
        });
    }
    group.finish();
}

fn render_with_background(c: &mut Criterion) {
    let frame = frame_8bit(1024);
    let background = Background::from_frame(&Frame::filled_u8(1024, 1024, 3));
    let settings = DisplaySettings {
        background_enabled: true,
        ..DisplaySettings::default()
    };
    c.bench_function("render_background_1024", |b| {
        b.iter(|| render(black_box(&frame), &settings, Some(&background), 750))
    });
}

criterion_group!(benches, render_throughput, render_with_background);
criterion_main!(benches);
