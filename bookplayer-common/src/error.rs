//! Common error types for the book player
//!
//! Errors fall into four classes that decide how a caller reacts:
//! - transient hardware faults are retried with backoff by the producer that hit them
//! - unresolved references (unknown card, book without tracks) are logged and ignored
//! - store failures are logged and retried on the next opportunity
//! - fatal errors abort startup

use thiserror::Error;

/// Common result type for book player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the book player crates
#[derive(Error, Debug)]
pub enum Error {
    /// Reader or backend timeout, disconnect, or similar recoverable hardware fault
    #[error("Hardware error: {0}")]
    HardwareTransient(String),

    /// Unknown card id, missing book or a book without playable tracks
    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    /// Progress or catalog persistence failure
    #[error("Store error: {0}")]
    Store(String),

    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Playback backend rejected a command
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unrecoverable resource acquisition failure
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether a retry of the same operation may succeed
    ///
    /// I/O errors count as transient: on the appliance they come from the
    /// serial line, the GPIO character device or the backend socket.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::HardwareTransient(_) | Error::Io(_))
    }

    /// Whether the error came from the persistence layer
    pub fn is_store_failure(&self) -> bool {
        match self {
            Error::Store(_) => true,
            #[cfg(feature = "sqlx")]
            Error::Database(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::HardwareTransient("reader timeout".into()).is_transient());
        assert!(Error::Io(std::io::Error::other("socket closed")).is_transient());
        assert!(!Error::UnresolvedReference("card 42".into()).is_transient());
        assert!(!Error::Fatal("no gpio chip".into()).is_transient());
    }

    #[test]
    fn test_store_classification() {
        assert!(Error::Store("disk full".into()).is_store_failure());
        assert!(!Error::Protocol("ACK [50@0] {add} No such file".into()).is_store_failure());
    }

    #[test]
    fn test_display() {
        let err = Error::UnresolvedReference("card 1243471995817856".into());
        assert_eq!(err.to_string(), "Unresolved reference: card 1243471995817856");
    }
}
