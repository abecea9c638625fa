//! Database access layer
//!
//! Provides the progress store; the schema itself is created by
//! `bookplayer_common::db::init_database`.

pub mod progress;

pub use progress::{MemoryProgressStore, ProgressStore, SqliteProgressStore};
