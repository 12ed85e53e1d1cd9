// Readers racing a writer must never see a torn frame
use rand::{Rng, SeedableRng};
use shmframe_core::config::ChannelConfig;
use shmframe_core::error::FrameError;
use shmframe_core::{Frame, FrameChannel, ReadOutcome};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const READERS: usize = 4;
const FRAMES: u64 = 2_000;
const REGION_SIZE: usize = 256 * 1024;

/// Fill `buf` with bytes derived from `seed`; the first 8 bytes hold the seed
fn fill_frame(buf: &mut [u8], seed: u64) {
    buf[..8].copy_from_slice(&seed.to_le_bytes());
    for (i, byte) in buf[8..].iter_mut().enumerate() {
        *byte = (seed.wrapping_mul(31).wrapping_add(i as u64) % 251) as u8;
    }
}

/// Whether a frame is exactly what `fill_frame` produced for its embedded seed
fn frame_is_intact(frame: &Frame) -> bool {
    let data = frame.data();
    if data.is_empty() {
        return true;
    }
    if data.len() < 8 {
        return false;
    }
    let seed = u64::from_le_bytes(data[..8].try_into().unwrap());
    data[8..]
        .iter()
        .enumerate()
        .all(|(i, &b)| b == (seed.wrapping_mul(31).wrapping_add(i as u64) % 251) as u8)
}

fn spawn_readers(
    dir: &Path,
    name: &'static str,
    done: &Arc<AtomicBool>,
    ready: &Arc<Barrier>,
) -> Vec<thread::JoinHandle<(u64, u64)>> {
    (0..READERS)
        .map(|_| {
            let config = ChannelConfig::with_shm_dir(dir);
            let done = done.clone();
            let ready = ready.clone();
            thread::spawn(move || {
                let mut reader = FrameChannel::with_config(config);
                reader.open(name).unwrap();
                ready.wait();

                let mut frames_seen = 0u64;
                let mut last_index = 0u64;
                while !done.load(Ordering::Acquire) {
                    let frame = match reader.read(Some(Duration::from_millis(5))) {
                        Ok(ReadOutcome::Frame(frame)) => frame,
                        Ok(ReadOutcome::Timeout) => continue,
                        Err(FrameError::Contention { .. }) => continue,
                        Err(e) => panic!("read failed: {}", e),
                    };

                    assert!(frame_is_intact(&frame), "torn frame {}", frame.frame_index());
                    assert!(frame.frame_index() >= last_index, "frame index went backwards");
                    assert_eq!(frame.len(), frame.metadata().frame_size as usize);
                    last_index = frame.frame_index();
                    frames_seen += 1;
                }

                // Writer is idle by now: the final frame must be whole
                let last = reader.try_read().unwrap();
                assert!(frame_is_intact(&last));
                assert!(last.frame_index() >= last_index);
                (frames_seen + 1, last.frame_index())
            })
        })
        .collect()
}

#[test]
fn test_write_frame_never_tears() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = FrameChannel::with_config(ChannelConfig::with_shm_dir(dir.path()));
    writer.create("stress_copy", REGION_SIZE, None).unwrap();
    let capacity = writer.capacity();

    let done = Arc::new(AtomicBool::new(false));
    let ready = Arc::new(Barrier::new(READERS + 1));
    let readers = spawn_readers(dir.path(), "stress_copy", &done, &ready);
    ready.wait();

    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5348_444D);
    let mut buf = vec![0u8; capacity];
    for seed in 1..=FRAMES {
        let len = rng.gen_range(8..=capacity);
        fill_frame(&mut buf[..len], seed);
        assert_eq!(writer.write_frame(&buf[..len]).unwrap(), seed);
    }
    thread::sleep(Duration::from_millis(20));
    done.store(true, Ordering::Release);

    for handle in readers {
        let (frames_seen, last_index) = handle.join().unwrap();
        assert!(frames_seen > 0);
        assert_eq!(last_index, FRAMES);
    }
}

#[test]
fn test_loan_never_tears() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = FrameChannel::with_config(ChannelConfig::with_shm_dir(dir.path()));
    writer.create("stress_loan", REGION_SIZE, None).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let ready = Arc::new(Barrier::new(READERS + 1));
    let readers = spawn_readers(dir.path(), "stress_loan", &done, &ready);
    ready.wait();

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    for seed in 1..=FRAMES {
        let mut loan = writer.loan().unwrap();
        let len = rng.gen_range(8..=loan.capacity());
        fill_frame(&mut loan.as_mut_slice()[..len], seed);
        assert_eq!(loan.commit(len).unwrap(), seed);
    }
    thread::sleep(Duration::from_millis(20));
    done.store(true, Ordering::Release);

    for handle in readers {
        let (frames_seen, last_index) = handle.join().unwrap();
        assert!(frames_seen > 0);
        assert_eq!(last_index, FRAMES);
    }
    assert_eq!(writer.metrics().frames_published, FRAMES);
}

#[test]
fn test_concurrent_create_single_creator() {
    let dir = tempfile::tempdir().unwrap();
    let start = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let config = ChannelConfig::with_shm_dir(dir.path());
            let start = start.clone();
            thread::spawn(move || {
                let mut chan = FrameChannel::with_config(config);
                start.wait();
                let role = chan.create("race", 64 * 1024, None).unwrap();
                (role, chan.capacity())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let creators = results
        .iter()
        .filter(|(role, _)| *role == shmframe_core::RegionRole::Creator)
        .count();
    assert_eq!(creators, 1);
    assert!(results.iter().all(|&(_, cap)| cap == results[0].1));
}
