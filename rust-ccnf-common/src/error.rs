//! Error types for the ccnf codec.

use thiserror::Error;

/// All possible errors produced while parsing or building wire messages.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A TLV header or value ran past the end of the buffer.
    #[error("truncated TLV at offset {0}")]
    Truncated(usize),

    /// A length encoding we do not support (the 64-bit marker).
    #[error("unsupported TLV length encoding at offset {0}")]
    UnsupportedLength(usize),

    /// The outer type of a message was not one we recognize.
    #[error("unknown message type {0:#04x}")]
    UnknownMessage(u8),

    /// A message violated the expected element order or nesting.
    #[error("malformed {kind}: {reason}")]
    Malformed {
        /// Which message kind was being parsed.
        kind: &'static str,
        /// What went wrong.
        reason: &'static str,
    },

    /// A message or name region exceeded the wire limits.
    #[error("oversize {kind}: {size} bytes")]
    Oversize {
        /// Which region was too large.
        kind: &'static str,
        /// Observed size.
        size: usize,
    },
}
