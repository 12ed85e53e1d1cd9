//! Shared helpers for the SHMFRAME benchmark binaries and criterion benches

/// Frame sizes exercised by the benches: 4 KiB, VGA RGB, 720p RGBA
pub const FRAME_SIZES: &[usize] = &[4096, 640 * 480 * 3, 1280 * 720 * 4];

/// Bytes at the start of a frame reserved for the send timestamp
pub const STAMP_BYTES: usize = 8;

/// Deterministic frame content of `size` bytes
pub fn create_frame(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i & 0xFF) as u8).collect()
}

/// Nanoseconds on the system-wide monotonic clock
///
/// Unlike `Instant`, values are comparable between processes on one host.
pub fn monotonic_nanos() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer; CLOCK_MONOTONIC always exists
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// Embed the current time at the start of `frame`
pub fn stamp_frame(frame: &mut [u8]) {
    if frame.len() >= STAMP_BYTES {
        frame[..STAMP_BYTES].copy_from_slice(&monotonic_nanos().to_le_bytes());
    }
}

/// Time embedded by [`stamp_frame`], if the frame is long enough
pub fn read_stamp(frame: &[u8]) -> Option<u64> {
    let bytes: [u8; STAMP_BYTES] = frame.get(..STAMP_BYTES)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

pub fn median(values: &[u64]) -> u64 {
    percentile(values, 50)
}

pub fn percentile(values: &[u64], p: usize) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = (sorted.len() * p) / 100;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_roundtrip() {
        let mut frame = create_frame(64);
        let before = monotonic_nanos();
        stamp_frame(&mut frame);
        let stamp = read_stamp(&frame).unwrap();
        assert!(stamp >= before);
        assert_eq!(read_stamp(&frame[..4]), None);
    }

    #[test]
    fn test_percentiles() {
        let values = [5, 1, 4, 2, 3];
        assert_eq!(median(&values), 3);
        assert_eq!(percentile(&values, 99), 5);
        assert_eq!(percentile(&[], 50), 0);
    }
}
