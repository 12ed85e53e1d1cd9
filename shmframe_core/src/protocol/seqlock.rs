//! Sequence-lock discipline over the header's `seq` counter
//!
//! Writers bracket every mutation with two increments (odd while writing).
//! Readers never block the writer: they snapshot `seq`, copy what they need,
//! and retry if `seq` moved. This protects readers from a single writer only;
//! it is not a mutex between writers.

use crate::error::{FrameError, FrameResult};
use crossbeam::utils::Backoff;
use std::sync::atomic::{fence, AtomicI32, Ordering};

#[inline]
pub fn is_write_in_progress(seq: i32) -> bool {
    seq & 1 != 0
}

/// An open write-side critical section
///
/// Creating one makes `seq` odd; dropping it makes `seq` even again, so the
/// closing increment happens on every exit path.
#[must_use = "the write section closes as soon as it is dropped"]
pub struct WriteSection<'a> {
    seq: &'a AtomicI32,
}

impl<'a> WriteSection<'a> {
    pub fn begin(seq: &'a AtomicI32) -> Self {
        seq.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        Self { seq }
    }
}

impl Drop for WriteSection<'_> {
    fn drop(&mut self) {
        fence(Ordering::SeqCst);
        self.seq.fetch_add(1, Ordering::SeqCst);
    }
}

/// Run `section` until it observes no concurrent write
///
/// `section` may run several times and must only copy data out. Errors it
/// returns are propagated immediately. After `max_attempts` unstable
/// attempts the read fails with [`FrameError::Contention`].
pub fn read<T, F>(seq: &AtomicI32, max_attempts: u32, mut section: F) -> FrameResult<T>
where
    F: FnMut() -> FrameResult<T>,
{
    let backoff = Backoff::new();

    for attempt in 1..=max_attempts {
        let start = seq.load(Ordering::Acquire);
        if is_write_in_progress(start) {
            backoff.snooze();
            continue;
        }

        fence(Ordering::SeqCst);
        let value = section()?;
        fence(Ordering::SeqCst);

        let end = seq.load(Ordering::Acquire);
        if start == end {
            return Ok(value);
        }

        log::debug!(
            "seqlock read overlapped a write (attempt {}/{}, seq {} -> {})",
            attempt,
            max_attempts,
            start,
            end
        );
        backoff.reset();
    }

    Err(FrameError::Contention {
        attempts: max_attempts,
    })
}
