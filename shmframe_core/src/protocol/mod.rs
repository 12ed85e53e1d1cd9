//! # Shared header protocol
//!
//! - **header**: the fixed binary layout at the start of every region
//! - **seqlock**: the writer/readers consistency discipline over `seq`
//! - **format**: frame geometry and metadata snapshots

pub mod format;
pub mod header;
pub mod seqlock;

pub use format::{FrameFormat, FrameMetadata};
pub use header::{SharedHeader, HEADER_SIZE, MIN_PAYLOAD, PROTOCOL_VERSION, SHARED_MAGIC};
pub use seqlock::WriteSection;
