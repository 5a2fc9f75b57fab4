//! Transactional node store with optimistic concurrency control.
//!
//! `ListStore` layers sessions over the sled backend. A `Txn` stages all
//! writes in memory and records the first committed observation of every row
//! it reads; `commit` re-validates those observations under the store's
//! commit lock and applies the staged writes as one atomic batch. Because
//! validation and apply happen under the same lock, committed transactions
//! form a serial order and any session whose reads went stale fails with
//! [`StorageError::TxnConflict`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::node::{Node, NodeId, PointerPatch};
use super::{Backend, StorageError, StorageResult};

/// Equality guard for a conditional write: the row must still carry
/// `version`, and each enabled pointer check must still match. Guards carry
/// the pointer whose continuity the operation depends on, not just the
/// version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Guard {
    version: u64,
    prev: Option<Option<NodeId>>,
    next: Option<Option<NodeId>>,
}

impl Guard {
    /// A guard checking only the version.
    pub fn version(version: u64) -> Self {
        Guard {
            version,
            prev: None,
            next: None,
        }
    }

    /// Additionally requires `prev` to equal the given pointer.
    pub fn with_prev(mut self, prev: Option<NodeId>) -> Self {
        self.prev = Some(prev);
        self
    }

    /// Additionally requires `next` to equal the given pointer.
    pub fn with_next(mut self, next: Option<NodeId>) -> Self {
        self.next = Some(next);
        self
    }

    fn matches(&self, node: &Node) -> bool {
        if node.version != self.version {
            return false;
        }
        if let Some(prev) = self.prev {
            if node.prev != prev {
                return false;
            }
        }
        if let Some(next) = self.next {
            if node.next != next {
                return false;
            }
        }
        true
    }
}

/// A staged write.
#[derive(Clone, Debug)]
enum Write {
    Put(Node),
    Delete,
}

/// The node store. Cheap to share; all mutation goes through sessions.
pub struct ListStore {
    backend: Arc<Backend>,

    /// Serializes commit-time validation and batch apply.
    commit_lock: Mutex<()>,
}

impl ListStore {
    pub fn new(backend: Arc<Backend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            commit_lock: Mutex::new(()),
        })
    }

    /// Opens a fresh transactional session.
    pub fn begin(&self) -> Txn<'_> {
        Txn {
            store: self,
            reads: HashMap::new(),
            head: None,
            writes: HashMap::new(),
        }
    }

    /// Returns every persisted node, in key (id-byte) order.
    ///
    /// This is the snapshot delivered to a newly attached session; clients
    /// reconstruct list order by walking `prev`/`next`. Holding the commit
    /// lock excludes in-flight batch applies, so the scan is a single
    /// consistent cut of the list.
    pub fn snapshot(&self) -> StorageResult<Vec<Node>> {
        let _serial = self.commit_lock.lock();
        let mut nodes = Vec::new();
        for (key, value) in self.backend.scan()? {
            nodes.push(decode_row(&key, &value)?);
        }
        Ok(nodes)
    }

    /// Reads the committed row for `id`, bypassing any session state.
    fn read_committed(&self, id: NodeId) -> StorageResult<Option<Node>> {
        match self.backend.get(&id.as_bytes())? {
            Some(data) => Ok(Some(Node::decode(id, &data)?)),
            None => Ok(None),
        }
    }

    /// Scans for the committed head (the node with `prev = nil`).
    fn committed_head(&self) -> StorageResult<Option<Node>> {
        for (key, value) in self.backend.scan()? {
            let node = decode_row(&key, &value)?;
            if node.prev.is_none() {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }
}

fn decode_row(key: &[u8], value: &[u8]) -> StorageResult<Node> {
    let id_bytes: [u8; 16] = key
        .try_into()
        .map_err(|_| StorageError::Codec(format!("node key has {} bytes, expected 16", key.len())))?;
    Node::decode(NodeId::from_bytes(id_bytes), value)
}

/// A transactional session: repeatable reads over a write overlay, with
/// commit-time validation of everything observed.
pub struct Txn<'a> {
    store: &'a ListStore,

    /// First committed observation of each row this session read.
    /// `None` records that the row was observed absent.
    reads: HashMap<NodeId, Option<Node>>,

    /// First committed observation of the head, if `find_head` ran.
    head: Option<Option<NodeId>>,

    /// Staged writes, applied only at commit.
    writes: HashMap<NodeId, Write>,
}

impl Txn<'_> {
    /// Reads a node by id within the session.
    pub fn find(&mut self, id: NodeId) -> StorageResult<Option<Node>> {
        if let Some(write) = self.writes.get(&id) {
            return Ok(match write {
                Write::Put(node) => Some(node.clone()),
                Write::Delete => None,
            });
        }
        if let Some(observed) = self.reads.get(&id) {
            return Ok(observed.clone());
        }
        let fetched = self.store.read_committed(id)?;
        self.reads.insert(id, fetched.clone());
        Ok(fetched)
    }

    /// Returns the head node (`prev = nil`), or `None` for an empty list.
    ///
    /// The observation is re-validated at commit, so two sessions cannot
    /// both install a head into an empty list.
    pub fn find_head(&mut self) -> StorageResult<Option<Node>> {
        // A node staged in this session with no predecessor is the head.
        for write in self.writes.values() {
            if let Write::Put(node) = write {
                if node.prev.is_none() {
                    return Ok(Some(node.clone()));
                }
            }
        }

        let committed = self.store.committed_head()?;
        if self.head.is_none() {
            self.head = Some(committed.as_ref().map(|n| n.id));
        }

        match committed {
            Some(node) => {
                self.reads.entry(node.id).or_insert_with(|| Some(node.clone()));
                match self.writes.get(&node.id) {
                    // The committed head was deleted or repointed in this
                    // session and nothing staged replaces it.
                    Some(Write::Delete) => Ok(None),
                    Some(Write::Put(staged)) => {
                        Ok(staged.prev.is_none().then(|| staged.clone()))
                    }
                    None => Ok(Some(node)),
                }
            }
            None => Ok(None),
        }
    }

    /// Stores a freshly constructed node.
    pub fn insert(&mut self, node: Node) {
        self.writes.insert(node.id, Write::Put(node));
    }

    /// Applies `patch` and bumps the version by one iff the row still
    /// matches `guard`. Returns the post-mutation node, or `None` if the
    /// predicate failed. Never partially applies.
    pub fn conditional_update(
        &mut self,
        id: NodeId,
        guard: Guard,
        patch: PointerPatch,
    ) -> StorageResult<Option<Node>> {
        let Some(current) = self.find(id)? else {
            return Ok(None);
        };
        if !guard.matches(&current) {
            return Ok(None);
        }

        let mut updated = current;
        patch.apply(&mut updated);
        updated.version += 1;

        self.writes.insert(id, Write::Put(updated.clone()));
        Ok(Some(updated))
    }

    /// Stages a delete iff the row still matches `guard`.
    pub fn conditional_delete(&mut self, id: NodeId, guard: Guard) -> StorageResult<bool> {
        let Some(current) = self.find(id)? else {
            return Ok(false);
        };
        if !guard.matches(&current) {
            return Ok(false);
        }

        self.writes.insert(id, Write::Delete);
        Ok(true)
    }

    /// Validates every observation against the committed state and applies
    /// the staged writes atomically. Fails with
    /// [`StorageError::TxnConflict`] if a concurrent commit got there first.
    pub fn commit(self) -> StorageResult<()> {
        let store = self.store;
        let _serial = store.commit_lock.lock();

        for (id, observed) in &self.reads {
            let current = store.read_committed(*id)?;
            let still_valid = match (observed, &current) {
                (None, None) => true,
                (Some(seen), Some(now)) => seen.version == now.version,
                _ => false,
            };
            if !still_valid {
                debug!(node_id = %id, "commit validation failed");
                return Err(StorageError::TxnConflict);
            }
        }

        if let Some(expected) = self.head {
            let actual = store.committed_head()?.map(|n| n.id);
            if actual != expected {
                debug!("commit validation failed: head changed");
                return Err(StorageError::TxnConflict);
            }
        }

        let mut batch = sled::Batch::default();
        for (id, write) in &self.writes {
            match write {
                Write::Put(node) => batch.insert(id.as_bytes().to_vec(), node.encode()),
                Write::Delete => batch.remove(id.as_bytes().to_vec()),
            }
        }
        store.backend.apply_batch(batch)?;

        Ok(())
    }

    /// Discards the session. Equivalent to dropping it; staged writes never
    /// reach the backend.
    pub fn rollback(self) {}
}
