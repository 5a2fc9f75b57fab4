//! List mutation engine.
//!
//! The two structural operations — insert-after and delete — run inside a
//! transactional session provided by the retry driver; the engine never
//! begins or commits a session itself. Every write is guarded by the version
//! and the continuity pointer observed earlier in the same session, so a
//! concurrent committed writer surfaces as a failed guard:
//!
//! - a failed guard is a lost race against a node that still exists; the
//!   operation signals [`MutationError::Retry`] and is sound to re-run with
//!   fresh reads;
//! - a missing anchor (the reference node of an insert, the target of a
//!   delete, a required neighbour) is permanent; the operation signals
//!   [`MutationError::Conflict`] and no retry can help.

pub mod retry;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::storage::{Guard, Node, NodeId, PointerPatch, StorageError, Txn};

/// Failure modes of a mutation attempt.
#[derive(Error, Debug)]
pub enum MutationError {
    /// A concurrent committed writer invalidated a version or pointer
    /// guard. Caught by the retry driver, never surfaced to callers.
    #[error("lost a write race on a version guard")]
    Retry,

    /// The operation's precondition is permanently unsatisfiable in the
    /// current state. Surfaced to the caller immediately.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type MutationResult<T> = Result<T, MutationError>;

/// Result of a successful insert-after.
#[derive(Clone, Debug)]
pub struct InsertOutcome {
    /// The freshly created node, at version 0.
    pub created: Node,

    /// Pointer changes applied to pre-existing neighbours.
    pub updated: BTreeMap<NodeId, PointerPatch>,
}

/// Result of a successful delete.
#[derive(Clone, Debug)]
pub struct DeleteOutcome {
    pub deleted: NodeId,

    /// Pointer changes applied to the surviving neighbours.
    pub updated: BTreeMap<NodeId, PointerPatch>,
}

/// Inserts a new node after `prev`, or at the head when `prev` is `None`.
pub fn insert_after(txn: &mut Txn<'_>, prev: Option<NodeId>) -> MutationResult<InsertOutcome> {
    match prev {
        None => insert_at_head(txn),
        Some(prev_id) => insert_after_node(txn, prev_id),
    }
}

fn insert_at_head(txn: &mut Txn<'_>) -> MutationResult<InsertOutcome> {
    let old_head = txn.find_head()?;
    let node = Node::new(None, old_head.as_ref().map(|h| h.id));

    let mut updated = BTreeMap::new();
    if let Some(head) = old_head {
        // The old head must still be the head and unchanged since our read.
        let repointed = txn.conditional_update(
            head.id,
            Guard::version(head.version).with_prev(None),
            PointerPatch::set_prev(Some(node.id)),
        )?;
        if repointed.is_none() {
            return Err(MutationError::Retry);
        }
        updated.insert(head.id, PointerPatch::set_prev(Some(node.id)));
    }

    txn.insert(node.clone());

    Ok(InsertOutcome {
        created: node,
        updated,
    })
}

fn insert_after_node(txn: &mut Txn<'_>, prev_id: NodeId) -> MutationResult<InsertOutcome> {
    let Some(prev) = txn.find(prev_id)? else {
        return Err(MutationError::Conflict(
            "reference node was deleted".to_string(),
        ));
    };
    let next_id = prev.next;
    let node = Node::new(Some(prev.id), next_id);

    let mut updated = BTreeMap::new();

    // Splice in behind: prev.next must still be the successor we observed.
    let repointed = txn.conditional_update(
        prev.id,
        Guard::version(prev.version).with_next(next_id),
        PointerPatch::set_next(Some(node.id)),
    )?;
    if repointed.is_none() {
        return Err(MutationError::Retry);
    }
    updated.insert(prev.id, PointerPatch::set_next(Some(node.id)));

    if let Some(next_id) = next_id {
        let Some(next) = txn.find(next_id)? else {
            return Err(MutationError::Conflict(
                "next node deleted concurrently".to_string(),
            ));
        };
        let repointed = txn.conditional_update(
            next_id,
            Guard::version(next.version).with_prev(Some(prev.id)),
            PointerPatch::set_prev(Some(node.id)),
        )?;
        if repointed.is_none() {
            return Err(MutationError::Retry);
        }
        updated.insert(next_id, PointerPatch::set_prev(Some(node.id)));
    }

    txn.insert(node.clone());

    Ok(InsertOutcome {
        created: node,
        updated,
    })
}

/// Unlinks and deletes `node_id`, stitching its neighbours together.
pub fn delete(txn: &mut Txn<'_>, node_id: NodeId) -> MutationResult<DeleteOutcome> {
    let Some(target) = txn.find(node_id)? else {
        return Err(MutationError::Conflict(
            "node not found or already deleted".to_string(),
        ));
    };
    let prev_id = target.prev;
    let next_id = target.next;

    let mut updated = BTreeMap::new();

    if let Some(prev_id) = prev_id {
        let Some(prev) = txn.find(prev_id)? else {
            return Err(MutationError::Conflict(
                "previous node deleted concurrently".to_string(),
            ));
        };
        let repointed = txn.conditional_update(
            prev_id,
            Guard::version(prev.version).with_next(Some(node_id)),
            PointerPatch::set_next(next_id),
        )?;
        if repointed.is_none() {
            return Err(MutationError::Retry);
        }
        updated.insert(prev_id, PointerPatch::set_next(next_id));
    }

    if let Some(next_id) = next_id {
        let Some(next) = txn.find(next_id)? else {
            return Err(MutationError::Conflict(
                "next node deleted concurrently".to_string(),
            ));
        };
        let repointed = txn.conditional_update(
            next_id,
            Guard::version(next.version).with_prev(Some(node_id)),
            PointerPatch::set_prev(prev_id),
        )?;
        if repointed.is_none() {
            return Err(MutationError::Retry);
        }
        updated.insert(next_id, PointerPatch::set_prev(prev_id));
    }

    if !txn.conditional_delete(node_id, Guard::version(target.version))? {
        return Err(MutationError::Retry);
    }

    Ok(DeleteOutcome {
        deleted: node_id,
        updated,
    })
}
