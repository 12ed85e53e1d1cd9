//! # SHMFRAME - latest-frame transport over shared memory
//!
//! Publish video frames from one process and read the newest one from many,
//! without sockets or copies through the kernel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shmframe::prelude::*;
//!
//! fn main() -> AnyResult<()> {
//!     let mut channel = FrameChannel::new();
//!     channel.create("camera0", 2 * 1024 * 1024, None)?;
//!     channel.set_format(640, 480, 3)?;
//!
//!     let mut loan = channel.loan()?;
//!     loan.as_mut_slice()[..4].copy_from_slice(&[1, 2, 3, 4]);
//!     let index = loan.commit(4).context("publishing frame")?;
//!     println!("published frame {}", index);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Seqlock-consistent reads** that never block the producer
//! - **Cross-process wakeups** with a polling fallback
//! - **Zero-copy writes** through frame loans

// Re-export core components
pub use shmframe_core::{self, *};

/// The SHMFRAME prelude - everything you need to get started
pub mod prelude {
    // Channel types
    pub use shmframe_core::channel::{Frame, FrameChannel, FrameLoan, ReadOutcome};
    pub use shmframe_core::config::ChannelConfig;
    pub use shmframe_core::memory::{EventNamespace, RegionRole};
    pub use shmframe_core::protocol::{FrameFormat, FrameMetadata};

    // Error types
    pub use shmframe_core::error::{FrameError, FrameResult};
    pub type Result<T> = FrameResult<T>;

    // Common std types
    pub use std::time::{Duration, Instant};

    // Common traits
    pub use serde::{Deserialize, Serialize};

    // Re-export anyhow for error handling
    pub use anyhow::{anyhow, bail, ensure, Context, Result as AnyResult};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get SHMFRAME version
pub fn version() -> &'static str {
    VERSION
}
