//! Error types for SHMFRAME
//!
//! Every fallible operation in the crate returns [`FrameResult`]. A read that
//! simply times out is not an error; see [`crate::channel::ReadOutcome`].

use thiserror::Error;

/// Errors raised by shared regions, the seqlock protocol and frame channels
#[derive(Debug, Error)]
pub enum FrameError {
    /// Caller supplied an unusable argument (name, size, empty data area)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An existing region carries a foreign magic or protocol version
    #[error("mapping format mismatch (magic {magic:#010x}, version {version})")]
    FormatMismatch { magic: u32, version: u32 },

    /// Operation attempted on a channel that is not attached to a region
    #[error("shared memory not created")]
    NotReady,

    /// Published payload does not fit the data area
    #[error("frame too large: {requested} bytes, capacity {capacity}")]
    InvalidSize { requested: usize, capacity: usize },

    /// Rejected width/height/channels triple
    #[error("invalid format {width}x{height}x{channels}")]
    InvalidFormat {
        width: u32,
        height: u32,
        channels: u32,
    },

    /// The seqlock read did not stabilise within the retry budget
    #[error("failed to read stable frame after {attempts} attempts")]
    Contention { attempts: u32 },

    /// Header advertises more payload than the reader's data area holds
    #[error("frame size {frame_size} exceeds capacity {capacity}")]
    CorruptHeader { frame_size: usize, capacity: usize },

    /// No region with this name exists
    #[error("shared memory '{0}' does not exist")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        FrameError::InvalidArgument(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        FrameError::Config(msg.into())
    }

    /// Whether retrying the same call may succeed without any other change
    pub fn is_transient(&self) -> bool {
        matches!(self, FrameError::Contention { .. })
    }
}

pub type FrameResult<T> = Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = FrameError::InvalidSize {
            requested: 11,
            capacity: 10,
        };
        assert_eq!(err.to_string(), "frame too large: 11 bytes, capacity 10");

        let err = FrameError::FormatMismatch {
            magic: 0xDEAD_BEEF,
            version: 1,
        };
        assert!(err.to_string().contains("0xdeadbeef"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: FrameError = io.into();
        assert!(matches!(err, FrameError::Io(_)));
        assert!(!err.is_transient());
        assert!(FrameError::Contention { attempts: 10 }.is_transient());
    }
}
