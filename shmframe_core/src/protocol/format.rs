//! Frame geometry carried in the shared header

use crate::error::{FrameError, FrameResult};
use serde::{Deserialize, Serialize};

/// Width, height and channel count of the published frames
///
/// The all-zero value means "no format negotiated yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl FrameFormat {
    pub const fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Accepts non-zero geometry with 3 or 4 channels
    pub fn validate(&self) -> FrameResult<()> {
        if self.width == 0 || self.height == 0 || !matches!(self.channels, 3 | 4) {
            return Err(FrameError::InvalidFormat {
                width: self.width,
                height: self.height,
                channels: self.channels,
            });
        }
        Ok(())
    }

    /// Payload bytes of one tightly packed frame in this format (saturating)
    pub fn expected_frame_size(&self) -> u64 {
        (self.width as u64 * self.height as u64).saturating_mul(self.channels as u64)
    }

    pub fn is_set(&self) -> bool {
        *self != Self::default()
    }
}

/// Consistent snapshot of the header fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetadata {
    #[serde(flatten)]
    pub format: FrameFormat,
    pub frame_size: u32,
    pub frame_index: u64,
    pub mapping_size: u64,
}

impl FrameMetadata {
    /// Whether the published size agrees with the advertised geometry
    ///
    /// A mismatch means a format change and a frame publish are in flight or
    /// the writer is using another layout. Readers should re-negotiate (or
    /// reattach) rather than treat it as corruption. Returns true while no
    /// format has been negotiated.
    pub fn format_consistent(&self) -> bool {
        !self.format.is_set() || self.format.expected_frame_size() == self.frame_size as u64
    }
}
