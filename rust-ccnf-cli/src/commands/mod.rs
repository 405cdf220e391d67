//! Subcommand implementations.

pub mod interest;
pub mod publish;
