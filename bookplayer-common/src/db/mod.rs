//! Database initialization for the progress store

pub mod init;

pub use init::*;
