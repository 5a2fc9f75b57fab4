//! Storage engine module: the version-stamped node store.
//!
//! The storage module persists the doubly-linked list in sled and mediates
//! all concurrent mutation through optimistic, transactional sessions:
//!
//! 1. A session (`Txn`) reads nodes through a write overlay plus a
//!    first-observation cache, giving repeatable reads for its lifetime.
//! 2. Conditional updates stage pointer changes only when the row still
//!    matches a `{version, pointer}` guard, bumping the version by one.
//! 3. Commit re-validates every observed row (and the head observation)
//!    under a process-wide commit lock, then applies the staged writes as a
//!    single atomic batch. A failed validation is a transaction conflict and
//!    the caller retries with fresh reads.
//!
//! Dropping a session discards its staged writes; nothing touches the
//! backend before commit.

pub mod backend;
pub mod node;
pub mod store;

pub use backend::{Backend, BackendConfig, BackendError, BackendResult};
pub use node::{InvalidNodeId, Node, NodeId, PointerPatch};
pub use store::{Guard, ListStore, Txn};

use thiserror::Error;

/// Storage engine errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Codec error: {0}")]
    Codec(String),

    /// A concurrent commit invalidated this session's reads. Retryable.
    #[error("transaction conflict: a concurrent commit invalidated the session's reads")]
    TxnConflict,
}

pub type StorageResult<T> = Result<T, StorageError>;
