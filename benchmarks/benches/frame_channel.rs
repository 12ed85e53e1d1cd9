//! Frame Channel Benchmarks
//!
//! In-process costs of the SHMFRAME hot paths:
//! - publish: header-only commit of bytes already in the data area
//! - write_frame: copy plus commit inside one write section
//! - write_frame_jitter: same, with frame sizes drawn at random per call
//! - try_read: seqlock-consistent copy out
//! - metadata: header snapshot without payload
//!
//! Run with: cargo bench --bench frame_channel

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use shmframe::prelude::*;
use shmframe::HEADER_SIZE;
use shmframe_benchmarks::{create_frame, FRAME_SIZES};
use std::time::Duration;

/// Channel rooted in its own temp directory so runs never collide; holds
/// frames of up to `frame_size` bytes
fn bench_channel(dir: &tempfile::TempDir, name: &str, frame_size: usize) -> FrameChannel {
    let mut channel = FrameChannel::with_config(ChannelConfig::with_shm_dir(dir.path()));
    channel.create(name, frame_size + HEADER_SIZE, None).unwrap();
    channel
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.measurement_time(Duration::from_secs(5));

    let dir = tempfile::tempdir().unwrap();
    let mut channel = bench_channel(&dir, "publish", 4096);

    group.bench_function("header_only", |b| {
        b.iter(|| black_box(channel.publish(black_box(1024)).unwrap()));
    });

    group.finish();
}

fn bench_write_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_frame");
    group.measurement_time(Duration::from_secs(5));

    for &size in FRAME_SIZES {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = bench_channel(&dir, "write", size);
        let frame = create_frame(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("copy_in", size), &frame, |b, frame| {
            b.iter(|| black_box(channel.write_frame(black_box(frame)).unwrap()));
        });
    }

    group.finish();
}

/// Variable-size frames, as from a compressed or cropped source
fn bench_write_frame_jitter(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_frame_jitter");
    group.measurement_time(Duration::from_secs(5));

    let max = 640 * 480 * 3;
    let dir = tempfile::tempdir().unwrap();
    let mut channel = bench_channel(&dir, "jitter", max);
    let frame = create_frame(max);
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);

    group.bench_function("up_to_vga", |b| {
        b.iter(|| {
            let len = rng.gen_range(1..=max);
            black_box(channel.write_frame(black_box(&frame[..len])).unwrap())
        });
    });

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    group.measurement_time(Duration::from_secs(5));

    for &size in FRAME_SIZES {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = bench_channel(&dir, "read", size);
        writer.write_frame(&create_frame(size)).unwrap();

        let mut reader = FrameChannel::with_config(ChannelConfig::with_shm_dir(dir.path()));
        reader.open("read").unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("try_read", size), &size, |b, _| {
            b.iter(|| black_box(reader.try_read().unwrap()));
        });
    }

    group.finish();
}

fn bench_metadata(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut channel = bench_channel(&dir, "meta", 4096);
    channel.set_format(640, 480, 3).unwrap();

    c.bench_function("metadata_snapshot", |b| {
        b.iter(|| black_box(channel.metadata().unwrap()));
    });
}

criterion_group!(
    benches,
    bench_publish,
    bench_write_frame,
    bench_write_frame_jitter,
    bench_read,
    bench_metadata
);
criterion_main!(benches);
