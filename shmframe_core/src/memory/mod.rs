//! # Shared memory objects for SHMFRAME
//!
//! - **ShmRegion**: a named, memory-mapped frame region with a validated header
//! - **Notifier**: the paired best-effort cross-process wake primitive
//! - **platform**: where named objects live on each OS
//!
//! Each type owns exactly one OS object and releases it on drop, so every
//! exit path of an attach attempt unwinds cleanly.

pub mod notify;
pub mod platform;
pub mod shm_region;

pub use notify::{EventNamespace, Notifier};
pub use platform::*;
pub use shm_region::{RegionRole, ShmRegion};
