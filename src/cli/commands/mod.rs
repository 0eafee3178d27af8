//! Command implementations for the CLI.

pub mod follow;
pub mod init;
