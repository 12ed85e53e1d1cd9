//! # SHMFRAME Frame Latency Benchmark - Multi-Process
//!
//! Measures publish-to-read latency between two processes sharing one region.
//!
//! ## Methodology
//!
//! - Producer stamps each frame with CLOCK_MONOTONIC before `write_frame`
//! - Consumer blocks in `read`, then subtracts the stamp from its own clock
//! - Frames are paced so the latest-frame channel rarely overwrites an unread one
//! - Runs once per frame size in `FRAME_SIZES`
//!
//! ## Usage
//!
//! ```bash
//! cargo build --release --bin frame_latency
//! ./target/release/frame_latency
//! ```

use anyhow::{bail, Context, Result};
use colored::Colorize;
use shmframe::prelude::*;
use shmframe::HEADER_SIZE;
use shmframe_benchmarks::{
    create_frame, median, monotonic_nanos, percentile, read_stamp, stamp_frame, FRAME_SIZES,
};
use std::env;
use std::fs;
use std::process::{Child, Command, Stdio};

const ITERATIONS: u64 = 2_000;
const WARMUP: u64 = 200;
const PACING: Duration = Duration::from_micros(200);

// Barrier states
const BARRIER_CONSUMER_READY: u8 = 2;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    // Subprocess mode
    if args.len() > 4 {
        let size: usize = args[4].parse().context("frame size argument")?;
        return match args[1].as_str() {
            "producer" => producer(&args[2], size),
            "consumer" => consumer(&args[2], &args[3], size),
            other => bail!("Unknown mode: {}", other),
        };
    }

    println!("\n{}", "═".repeat(80).bright_cyan().bold());
    println!("{}", "  SHMFRAME FRAME LATENCY BENCHMARK".bright_cyan().bold());
    println!("{}", "  Producer and consumer in separate processes".bright_cyan());
    println!("{}", "═".repeat(80).bright_cyan().bold());

    println!("\n{}", "Benchmark Configuration:".bright_yellow());
    println!("  • Frames per run: {}", format!("{}", ITERATIONS).bright_green());
    println!("  • Warmup frames: {}", format!("{}", WARMUP).bright_green());
    println!("  • Pacing: {:?} between frames", PACING);
    println!();

    for &size in FRAME_SIZES {
        print!("  {} bytes: ", size);
        std::io::Write::flush(&mut std::io::stdout())?;

        let latencies = run_benchmark(size)?;
        if latencies.is_empty() {
            println!("{}", "no frames received".bright_red());
            continue;
        }

        println!(
            "median {} ns, p99 {} ns, {} / {} frames seen",
            format!("{}", median(&latencies)).bright_green(),
            percentile(&latencies, 99),
            latencies.len(),
            ITERATIONS
        );
    }

    println!("\n{}", "═".repeat(80).bright_cyan().bold());
    println!();
    Ok(())
}

fn run_benchmark(size: usize) -> Result<Vec<u64>> {
    let region = format!("bench_{}_{}", std::process::id(), size);
    let barrier_file = env::temp_dir().join(format!("shmframe_barrier_{}", std::process::id()));
    let barrier = barrier_file.to_string_lossy().into_owned();

    fs::write(&barrier_file, [0])?;

    let consumer = spawn_process("consumer", &region, &barrier, size)?;
    wait_for_barrier(&barrier, BARRIER_CONSUMER_READY, Duration::from_secs(5));
    let producer = spawn_process("producer", &region, &barrier, size)?;

    let producer_output = producer.wait_with_output()?;
    let consumer_output = consumer.wait_with_output()?;

    let _ = fs::remove_file(&barrier_file);
    let _ = FrameChannel::unlink(&region, &ChannelConfig::default());

    if !producer_output.status.success() {
        bail!(
            "Producer failed: {}",
            String::from_utf8_lossy(&producer_output.stderr)
        );
    }
    if !consumer_output.status.success() {
        bail!(
            "Consumer failed: {}",
            String::from_utf8_lossy(&consumer_output.stderr)
        );
    }

    Ok(String::from_utf8_lossy(&consumer_output.stdout)
        .lines()
        .filter_map(|line| line.parse::<u64>().ok())
        .collect())
}

fn spawn_process(mode: &str, region: &str, barrier: &str, size: usize) -> Result<Child> {
    let exe = env::current_exe()?;
    Command::new(&exe)
        .arg(mode)
        .arg(region)
        .arg(barrier)
        .arg(size.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning {}", mode))
}

fn producer(region: &str, size: usize) -> Result<()> {
    let mut channel = FrameChannel::new();
    channel.create(region, size + HEADER_SIZE, None)?;

    let mut frame = create_frame(size);
    for _ in 0..WARMUP + ITERATIONS {
        stamp_frame(&mut frame);
        channel.write_frame(&frame)?;
        std::thread::sleep(PACING);
    }
    eprintln!("Producer: published {} frames", channel.metrics().frames_published);
    Ok(())
}

fn consumer(region: &str, barrier: &str, size: usize) -> Result<()> {
    let mut channel = FrameChannel::new();
    channel.create(region, size + HEADER_SIZE, None)?;
    write_barrier(barrier, BARRIER_CONSUMER_READY);

    let mut last_index = 0;
    while last_index < WARMUP + ITERATIONS {
        let frame = match channel.read(Some(Duration::from_secs(2)))? {
            ReadOutcome::Frame(frame) => frame,
            ReadOutcome::Timeout => {
                eprintln!("Consumer: timed out after frame {}", last_index);
                break;
            }
        };
        let now = monotonic_nanos();

        if frame.frame_index() <= last_index {
            continue;
        }
        last_index = frame.frame_index();

        if last_index > WARMUP {
            if let Some(sent) = read_stamp(frame.data()) {
                println!("{}", now.saturating_sub(sent));
            }
        }
    }
    Ok(())
}

// ============================================================================
// UTILITIES
// ============================================================================

fn wait_for_barrier(barrier_file: &str, expected: u8, timeout: Duration) {
    let start = Instant::now();
    loop {
        if let Ok(data) = fs::read(barrier_file) {
            if data.first() == Some(&expected) {
                return;
            }
        }
        if start.elapsed() > timeout {
            eprintln!("Barrier timeout waiting for state {}", expected);
            return;
        }
        std::thread::sleep(Duration::from_micros(100));
    }
}

fn write_barrier(barrier_file: &str, state: u8) {
    let _ = fs::write(barrier_file, [state]);
}
