//! Data-plane engine for the ccnf forwarder.
//!
//! The pieces: a deadline scheduler, the face table, the content store
//! with its name-ordered index, the interest-prefix and propagating
//! tables, the matching engine joining them, and the socket transport
//! that feeds it all from one event loop.

pub mod config;
pub mod engine;
pub mod face;
pub mod pit;
pub mod propagating;
pub mod sched;
pub mod store;
pub mod transport;

use thiserror::Error;

/// Errors surfaced by the engine and transport.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The face table is at its hard slot limit.
    #[error("face table is full")]
    FaceTableFull,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub use config::Config;
pub use engine::Forwarder;
pub use face::{Face, FaceId};
pub use transport::Transport;
