// Cross-platform shared memory path abstraction
//
// Linux: /dev/shm/shmframe (tmpfs - RAM-backed, fastest)
// macOS: /tmp/shmframe (regular filesystem, but still fast for IPC)
// Windows: %TEMP%\shmframe (uses system temp directory)

use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Prefix applied to a region name to form its notification object name
pub const EVENT_PREFIX: &str = "SHM_EV_";

/// Get the base directory for SHMFRAME shared memory
///
/// This returns a platform-appropriate path for shared memory:
/// - Linux: `/dev/shm/shmframe` (tmpfs for maximum performance)
/// - macOS: `/tmp/shmframe` (no /dev/shm, but /tmp is still fast)
/// - Windows: `%TEMP%\shmframe` (system temp directory)
pub fn shm_base_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/dev/shm/shmframe")
    }

    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/tmp/shmframe")
    }

    #[cfg(target_os = "windows")]
    {
        std::env::temp_dir().join("shmframe")
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        PathBuf::from("/tmp/shmframe")
    }
}

/// Global (cross-session) notification namespace under `base`
pub fn shm_global_dir(base: &Path) -> PathBuf {
    base.join("global")
}

/// Session-local notification namespace under `base`
pub fn shm_session_dir(base: &Path, session_id: &str) -> PathBuf {
    base.join("sessions").join(session_id)
}

/// Convert a caller-supplied object name to a safe file name
///
/// Path separators, `:` and the escape character itself are written as
/// `%XX`, so distinct names always map to distinct files.
pub fn safe_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' | '/' | '\\' | ':' => {
                let _ = write!(out, "%{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// File name of the notification object paired with region `name`
pub fn event_name(name: &str) -> String {
    format!("{}{}", EVENT_PREFIX, safe_name(name))
}

/// Identifier of the current login session, used for the local namespace
pub fn default_session_id() -> String {
    #[cfg(unix)]
    {
        // SAFETY: getsid(0) only queries the calling process
        let sid = unsafe { libc::getsid(0) };
        if sid >= 0 {
            return sid.to_string();
        }
        // SAFETY: getuid has no failure mode
        format!("uid{}", unsafe { libc::getuid() })
    }

    #[cfg(not(unix))]
    {
        std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string())
    }
}

/// Allocation granularity of shared mappings
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf is always safe to call
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
        4096
    }

    #[cfg(not(unix))]
    {
        4096
    }
}

/// Round `size` up to the allocation granularity
pub fn round_to_page(size: usize) -> Option<usize> {
    let page = page_size();
    size.checked_add(page - 1).map(|s| s / page * page)
}

/// Whether waiters block in the kernel rather than poll
pub fn has_native_wait() -> bool {
    cfg!(target_os = "linux")
}

/// Get platform name for logging/diagnostics
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "linux")]
    { "Linux" }

    #[cfg(target_os = "macos")]
    { "macOS" }

    #[cfg(target_os = "windows")]
    { "Windows" }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    { "Unix" }
}
