//! Wire codec and shared primitives for the ccnf forwarder.
//!
//! This crate knows how Interest and ContentObject messages look on the
//! wire and nothing about forwarding. The daemon's tables work on raw
//! message bytes plus the offset views produced here.

pub mod bloom;
pub mod error;
pub mod metrics;
pub mod name;
pub mod packet;
pub mod tlv;

/// Reexport of common types
pub use error::CodecError;
pub type Result<T> = std::result::Result<T, CodecError>;
