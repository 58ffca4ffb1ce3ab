//! Persistence Collaborator Seam
//!
//! Snapshotting and append-log rewriting live outside the core; SAVE,
//! BGREWRITEAOF and LASTSAVE talk to whatever implementation is wired in
//! at startup. Failures are reported to the client, never retried here.

use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PersistenceError {
    /// No data directory was configured.
    #[error("persistence is disabled")]
    Disabled,

    /// The backing store reported a failure.
    #[error("{0}")]
    Backend(String),
}

/// Durable-storage collaborator the core consumes.
pub trait Persistence: Debug + Send + Sync {
    /// Writes the current keyspace to stable storage.
    fn take_snapshot(&self) -> Result<(), PersistenceError>;

    /// Compacts the append log.
    fn rewrite_aof(&self) -> Result<(), PersistenceError>;

    /// Millisecond epoch of the latest snapshot; 0 when none exists.
    fn latest_snapshot_ms(&self) -> u64;
}

/// The no-op collaborator used when `--data-dir` is empty.
#[derive(Debug, Default)]
pub struct Disabled;

impl Persistence for Disabled {
    fn take_snapshot(&self) -> Result<(), PersistenceError> {
        Err(PersistenceError::Disabled)
    }

    fn rewrite_aof(&self) -> Result<(), PersistenceError> {
        Err(PersistenceError::Disabled)
    }

    fn latest_snapshot_ms(&self) -> u64 {
        0
    }
}
