//! # SHMFRAME Core
//!
//! Latest-frame transport over named shared memory.
//!
//! One producer publishes variable-sized frames (typically images) into a
//! named region; any number of consumers, in this or other processes, copy
//! out the most recent one. There is no queue: a consumer that falls behind
//! simply sees the newest frame next time.
//!
//! - **Memory**: named regions and the paired cross-process notification
//! - **Protocol**: the fixed header layout and its seqlock discipline
//! - **Channel**: the create/open/publish/read surface built on both
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shmframe_core::{FrameChannel, FrameFormat};
//! use std::time::Duration;
//!
//! # fn main() -> shmframe_core::FrameResult<()> {
//! let mut writer = FrameChannel::new();
//! writer.create("camera0", 2 * 1024 * 1024, Some(FrameFormat::new(640, 480, 3)))?;
//! writer.write_frame(&vec![0u8; 640 * 480 * 3])?;
//!
//! let mut reader = FrameChannel::new();
//! reader.open("camera0")?;
//! if let Some(frame) = reader.read(Some(Duration::from_millis(100)))?.into_frame() {
//!     println!("frame {} ({} bytes)", frame.frame_index(), frame.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod memory;
pub mod protocol;

// Re-export commonly used types for easy access
pub use channel::{ChannelMetrics, Frame, FrameChannel, FrameLoan, ReadOutcome};
pub use config::ChannelConfig;
pub use error::{FrameError, FrameResult};
pub use memory::{EventNamespace, Notifier, RegionRole, ShmRegion};
pub use protocol::{FrameFormat, FrameMetadata, HEADER_SIZE};
