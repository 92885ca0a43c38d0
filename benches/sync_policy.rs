// SPDX-License-Identifier: MPL-2.0
//! Benchmarks for the per-frame decision paths.
//!
//! Measures the performance of:
//! - Frame sync decisions against the master clock
//! - Pixel format negotiation in the `get_format` callback
//! - Audio output format negotiation
//! - Frame copies into the presentation slot

use criterion::{criterion_group, criterion_main, Criterion};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame;
use std::hint::black_box;
use std::sync::Arc;
use vidlens::video_player::simulated::{ManualTimeSource, SimulatedAudioHost};
use vidlens::video_player::{
    decide, negotiate_output_format, negotiate_pixel_format, AudioFormat, PresentedFrame,
    SyncThresholds,
};

/// Benchmark the sync decision across early, on-time and late frames.
fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_policy");
    let thresholds = SyncThresholds::default();
    let delays: Vec<f64> = (-50..50).map(|i| f64::from(i) * 0.01).collect();

    group.bench_function("decide", |b| {
        b.iter(|| {
            for delay in &delays {
                black_box(decide(
                    black_box(*delay),
                    false,
                    true,
                    1.0 / 30.0,
                    &thresholds,
                ));
            }
        });
    });

    group.finish();
}

/// Benchmark pixel format negotiation for typical decoder offers.
fn bench_negotiate_pixel_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_policy");
    let sdr = [Pixel::D3D11, Pixel::NV12, Pixel::YUV420P];
    let hdr = [Pixel::D3D11, Pixel::P010LE, Pixel::YUV420P10LE];

    group.bench_function("negotiate_pixel_format_sdr", |b| {
        b.iter(|| black_box(negotiate_pixel_format(black_box(&sdr), false)));
    });
    group.bench_function("negotiate_pixel_format_hdr", |b| {
        b.iter(|| black_box(negotiate_pixel_format(black_box(&hdr), true)));
    });

    group.finish();
}

/// Benchmark audio format negotiation against a device that only takes 44.1 kHz stereo.
fn bench_negotiate_output_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_policy");
    let host = SimulatedAudioHost::new(Arc::new(ManualTimeSource::new()))
        .with_supported(vec![AudioFormat::stereo(44_100)]);
    let input = AudioFormat {
        sample_rate: 48_000,
        channels: 6,
    };

    group.bench_function("negotiate_output_format", |b| {
        b.iter(|| black_box(negotiate_output_format(black_box(input), &host)));
    });

    group.finish();
}

/// Benchmark the staging copy of a 1080p NV12 frame.
fn bench_frame_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_policy");
    ffmpeg_next::init().unwrap();
    let mut source = frame::Video::new(Pixel::NV12, 1920, 1080);
    for plane in 0..source.planes() {
        source.data_mut(plane).fill(16);
    }

    group.bench_function("copy_nv12_1080p", |b| {
        b.iter(|| black_box(PresentedFrame::copy_from(black_box(&source), 0.0)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decide,
    bench_negotiate_pixel_format,
    bench_negotiate_output_format,
    bench_frame_copy
);
criterion_main!(benches);
