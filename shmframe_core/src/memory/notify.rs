//! Cross-process frame notification.
//!
//! Every region `name` has a companion object `SHM_EV_<name>`: a small shared
//! file whose first word is a pulse counter. Writers bump the counter and wake
//! waiters; on Linux waiters sleep on the word with a shared futex, elsewhere
//! they poll it.
//!
//! The object is looked up in the global namespace first and falls back to
//! the session-local one. Handles that end up in different namespaces do not
//! see each other's pulses, so callers relying on cross-session delivery
//! should check [`Notifier::namespace`].
//!
//! Wakes are single-slot: a handle remembers the last pulse it consumed and
//! any number of newer pulses satisfy one wait.

use super::platform;
use crate::config::ChannelConfig;
use crate::error::FrameResult;
use memmap2::{MmapOptions, MmapRaw};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Size of the notification object (one cache line)
const EVENT_OBJECT_SIZE: u64 = 64;

/// Namespace a notification object was obtained in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventNamespace {
    /// Visible to every session on the host
    Global,
    /// Visible to the current session only
    Local,
}

/// Handle to the notification object paired with a frame region
#[derive(Debug)]
pub struct Notifier {
    mmap: MmapRaw,
    _file: File,
    path: PathBuf,
    namespace: EventNamespace,
    /// Last pulse value this handle returned from `wait`
    consumed: AtomicU32,
}

impl Notifier {
    /// Open or create the notification object for region `name`
    pub fn open_or_create(name: &str, config: &ChannelConfig) -> FrameResult<Self> {
        let file_name = platform::event_name(name);
        let base = config.region_dir();

        match Self::open_in(
            &platform::shm_global_dir(&base),
            &file_name,
            EventNamespace::Global,
        ) {
            Ok(notifier) => Ok(notifier),
            Err(e) => {
                log::warn!(
                    "Notification '{}' unavailable in global namespace ({}), using session-local",
                    file_name,
                    e
                );
                Self::open_in(
                    &platform::shm_session_dir(&base, &config.session()),
                    &file_name,
                    EventNamespace::Local,
                )
            }
        }
    }

    fn open_in(dir: &Path, file_name: &str, namespace: EventNamespace) -> FrameResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        // Growing to the same length twice is harmless if two processes race here
        if file.metadata()?.len() < EVENT_OBJECT_SIZE {
            file.set_len(EVENT_OBJECT_SIZE)?;
        }
        let mmap = MmapOptions::new().map_raw(&file)?;

        log::debug!(
            "Notification '{}' attached ({:?}, {} {})",
            path.display(),
            namespace,
            platform::platform_name(),
            if platform::has_native_wait() { "futex" } else { "polling" }
        );

        Ok(Self {
            mmap,
            _file: file,
            path,
            namespace,
            consumed: AtomicU32::new(0),
        })
    }

    /// Remove the notification objects for `name` from both namespaces
    pub fn unlink(name: &str, config: &ChannelConfig) -> FrameResult<()> {
        let file_name = platform::event_name(name);
        let base = config.region_dir();
        for dir in [
            platform::shm_global_dir(&base),
            platform::shm_session_dir(&base, &config.session()),
        ] {
            let path = dir.join(&file_name);
            if !path.exists() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn pulse(&self) -> &AtomicU32 {
        // SAFETY: the mapping is page aligned, EVENT_OBJECT_SIZE long, and
        // lives as long as self
        unsafe { &*(self.mmap.as_ptr() as *const AtomicU32) }
    }

    /// Post a pulse and wake every waiter
    pub fn signal(&self) {
        self.pulse().fetch_add(1, Ordering::SeqCst);
        wake_all(self.pulse());
    }

    /// Block until a pulse this handle has not consumed yet is posted
    ///
    /// Returns false if `timeout` expires first. `None`, or a timeout too
    /// large to form a deadline, waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        loop {
            let current = self.pulse().load(Ordering::Acquire);
            if self.consumed.swap(current, Ordering::AcqRel) != current {
                return true;
            }

            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    Some(deadline - now)
                }
            };
            wait_for_change(self.pulse(), current, remaining);
        }
    }

    /// Whether a pulse is pending for this handle
    pub fn is_signaled(&self) -> bool {
        self.pulse().load(Ordering::Acquire) != self.consumed.load(Ordering::Acquire)
    }

    pub fn namespace(&self) -> EventNamespace {
        self.namespace
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(target_os = "linux")]
fn wait_for_change(word: &AtomicU32, expected: u32, timeout: Option<Duration>) {
    let timespec = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let timespec_ptr = timespec
        .as_ref()
        .map_or(std::ptr::null(), |t| t as *const libc::timespec);

    // Shared (non-private) futex: waiters and wakers live in different
    // processes. EAGAIN, EINTR and ETIMEDOUT all send the caller back to
    // re-check the pulse, so the result is ignored.
    // SAFETY: `word` points into a live shared mapping for the whole call
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            timespec_ptr,
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

#[cfg(target_os = "linux")]
fn wake_all(word: &AtomicU32) {
    // SAFETY: `word` points into a live shared mapping for the whole call
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE,
            i32::MAX,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn wait_for_change(word: &AtomicU32, expected: u32, timeout: Option<Duration>) {
    const POLL: Duration = Duration::from_millis(1);
    if word.load(Ordering::Acquire) == expected {
        std::thread::sleep(timeout.map_or(POLL, |t| t.min(POLL)));
    }
}

#[cfg(not(target_os = "linux"))]
fn wake_all(_word: &AtomicU32) {}
