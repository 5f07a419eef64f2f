//! Protocol-level error types.

use thiserror::Error;

/// Errors produced by the framing codecs.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying transport failure, surfaced through the codec traits.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A varint length header ran past its maximum encoded size.
    #[error("frame header is not a valid varint")]
    BadFrameHeader,

    /// A length header announced a frame larger than the configured bound.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// Announced frame size.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },
}

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
