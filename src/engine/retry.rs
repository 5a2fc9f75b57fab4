//! Retry driver for optimistic mutations.
//!
//! Runs a mutation closure inside a fresh transactional session per attempt.
//! Lost races ([`MutationError::Retry`] from the closure, or a commit-time
//! [`StorageError::TxnConflict`]) re-run with fresh reads up to the attempt
//! budget; permanent conflicts and every other error surface immediately.

use tracing::debug;

use super::{MutationError, MutationResult};
use crate::storage::{ListStore, StorageError, Txn};

/// Default attempt budget. Under heavy contention on a single node the
/// budget can exhaust spuriously; the guarantee is global progress per
/// round, not per-caller success.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Runs `op` until it commits, the attempt budget is exhausted, or it fails
/// permanently.
///
/// Each attempt gets a fresh session, so nothing staged by a failed attempt
/// leaks into the next one. No backoff is applied between attempts: commits
/// serialize on the store's commit lock, so a retrying session cannot starve
/// the writer it lost to.
pub fn with_retry<T, F>(store: &ListStore, max_attempts: u32, mut op: F) -> MutationResult<T>
where
    F: FnMut(&mut Txn<'_>) -> MutationResult<T>,
{
    for attempt in 1..=max_attempts {
        let mut txn = store.begin();
        match op(&mut txn) {
            Ok(value) => match txn.commit() {
                Ok(()) => return Ok(value),
                Err(StorageError::TxnConflict) => {
                    debug!(attempt, "commit lost a write race");
                    continue;
                }
                Err(other) => return Err(MutationError::Storage(other)),
            },
            Err(MutationError::Retry) => {
                // Dropping the session rolls the attempt back.
                debug!(attempt, "guard lost a write race");
                continue;
            }
            Err(other) => return Err(other),
        }
    }

    Err(MutationError::Conflict(
        "could not complete operation after several retries".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Backend, BackendConfig, Node};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_store() -> (Arc<ListStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let backend = Backend::new(BackendConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        (ListStore::new(backend), temp_dir)
    }

    #[test]
    fn test_returns_first_success() {
        let (store, _dir) = test_store();

        let mut attempts = 0;
        let result = with_retry(&store, 10, |txn| {
            attempts += 1;
            let node = Node::new(None, None);
            txn.insert(node.clone());
            Ok(node.id)
        });

        assert!(result.is_ok());
        assert_eq!(attempts, 1);
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_retries_until_success() {
        let (store, _dir) = test_store();

        let mut attempts = 0;
        let result: MutationResult<()> = with_retry(&store, 10, |txn| {
            attempts += 1;
            if attempts < 4 {
                return Err(MutationError::Retry);
            }
            txn.insert(Node::new(None, None));
            Ok(())
        });

        assert!(result.is_ok());
        assert_eq!(attempts, 4);
    }

    #[test]
    fn test_exhausted_budget_is_conflict() {
        let (store, _dir) = test_store();

        let mut attempts = 0;
        let result: MutationResult<()> = with_retry(&store, 3, |_txn| {
            attempts += 1;
            Err(MutationError::Retry)
        });

        assert_eq!(attempts, 3);
        let err = result.unwrap_err();
        assert!(matches!(err, MutationError::Conflict(_)));
        assert_eq!(
            err.to_string(),
            "could not complete operation after several retries"
        );
    }

    #[test]
    fn test_conflict_surfaces_immediately() {
        let (store, _dir) = test_store();

        let mut attempts = 0;
        let result: MutationResult<()> = with_retry(&store, 10, |_txn| {
            attempts += 1;
            Err(MutationError::Conflict("anchor is gone".to_string()))
        });

        assert_eq!(attempts, 1);
        assert_eq!(result.unwrap_err().to_string(), "anchor is gone");
    }

    #[test]
    fn test_other_errors_surface_unchanged() {
        let (store, _dir) = test_store();

        let mut attempts = 0;
        let result: MutationResult<()> = with_retry(&store, 10, |_txn| {
            attempts += 1;
            Err(MutationError::Storage(StorageError::Codec(
                "row corrupted".to_string(),
            )))
        });

        assert_eq!(attempts, 1);
        assert!(matches!(
            result.unwrap_err(),
            MutationError::Storage(StorageError::Codec(_))
        ));
    }

    #[test]
    fn test_failed_attempts_do_not_leak_writes() {
        let (store, _dir) = test_store();

        let result: MutationResult<()> = with_retry(&store, 2, |txn| {
            txn.insert(Node::new(None, None));
            Err(MutationError::Retry)
        });

        assert!(result.is_err());
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_commit_conflict_retries_with_fresh_reads() {
        let (store, _dir) = test_store();
        let node = Node::new(None, None);
        let mut txn = store.begin();
        txn.insert(node.clone());
        txn.commit().unwrap();

        // First attempt observes version 0, then a competing session bumps
        // the row before our commit; the second attempt sees version 1.
        let mut attempts = 0;
        let result = with_retry(&store, 10, |txn| {
            attempts += 1;
            let current = txn.find(node.id)?.expect("node exists");
            if attempts == 1 {
                let mut competitor = store.begin();
                competitor
                    .conditional_update(
                        node.id,
                        crate::storage::Guard::version(0),
                        crate::storage::PointerPatch::set_next(None),
                    )?
                    .expect("competitor guard holds");
                competitor.commit()?;
            }
            Ok(current.version)
        });

        assert_eq!(attempts, 2);
        assert_eq!(result.unwrap(), 1);
    }
}
