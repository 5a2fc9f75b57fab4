//! List node entity and its storage row codec.
//!
//! A node carries nothing but its identity, the two structural pointers and
//! an optimistic-lock version counter. The row value is a fixed-layout
//! encoding; the row key is the 16 id bytes.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use super::StorageError;

/// Row layout: presence flags (1) + prev id (16) + next id (16) + version (8).
const ROW_LEN: usize = 1 + 16 + 16 + 8;

const FLAG_PREV: u8 = 0b01;
const FLAG_NEXT: u8 = 0b10;

/// Raised when a wire-form node id fails to parse as a UUID.
#[derive(Error, Debug)]
#[error("invalid node id: {0}")]
pub struct InvalidNodeId(pub String);

/// Opaque node identity, assigned at creation and stable for life.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        NodeId(Uuid::new_v4())
    }

    /// Parses the wire form (hyphenated UUID string).
    pub fn parse(s: &str) -> Result<Self, InvalidNodeId> {
        Uuid::parse_str(s)
            .map(NodeId)
            .map_err(|_| InvalidNodeId(s.to_string()))
    }

    /// The storage key bytes for this id.
    pub fn as_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        NodeId(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A persisted list node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    /// Node identity; also the storage key.
    pub id: NodeId,

    /// Predecessor id, `None` for the head.
    pub prev: Option<NodeId>,

    /// Successor id, `None` for the tail.
    pub next: Option<NodeId>,

    /// Bumped by exactly one on every committed mutation of this node.
    pub version: u64,
}

impl Node {
    /// Constructs a fresh node at version 0 with the given pointers.
    pub fn new(prev: Option<NodeId>, next: Option<NodeId>) -> Self {
        Node {
            id: NodeId::generate(),
            prev,
            next,
            version: 0,
        }
    }

    /// Serializes the row value (the key is `id.as_bytes()`).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ROW_LEN);

        let mut flags = 0u8;
        if self.prev.is_some() {
            flags |= FLAG_PREV;
        }
        if self.next.is_some() {
            flags |= FLAG_NEXT;
        }
        buf.push(flags);

        buf.extend_from_slice(&self.prev.map(|id| id.as_bytes()).unwrap_or([0; 16]));
        buf.extend_from_slice(&self.next.map(|id| id.as_bytes()).unwrap_or([0; 16]));
        buf.extend_from_slice(&self.version.to_le_bytes());

        buf
    }

    /// Deserializes a row value read back under `id`.
    pub fn decode(id: NodeId, data: &[u8]) -> Result<Self, StorageError> {
        if data.len() != ROW_LEN {
            return Err(StorageError::Codec(format!(
                "node row has {} bytes, expected {}",
                data.len(),
                ROW_LEN
            )));
        }

        let flags = data[0];
        let prev_bytes: [u8; 16] = data[1..17].try_into().expect("sliced to 16 bytes");
        let next_bytes: [u8; 16] = data[17..33].try_into().expect("sliced to 16 bytes");
        let version = u64::from_le_bytes(data[33..41].try_into().expect("sliced to 8 bytes"));

        Ok(Node {
            id,
            prev: (flags & FLAG_PREV != 0).then(|| NodeId::from_bytes(prev_bytes)),
            next: (flags & FLAG_NEXT != 0).then(|| NodeId::from_bytes(next_bytes)),
            version,
        })
    }
}

/// Pointer changes to apply to (or report about) an existing node.
///
/// The outer `Option` distinguishes "pointer untouched" from "pointer set",
/// the inner one carries the new target (`None` = the node becomes head or
/// tail). The same shape serves as the mutation argument of
/// `conditional_update` and as the per-node delta fanned out to clients.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PointerPatch {
    pub prev: Option<Option<NodeId>>,
    pub next: Option<Option<NodeId>>,
}

impl PointerPatch {
    /// A patch that repoints `prev` and leaves `next` untouched.
    pub fn set_prev(to: Option<NodeId>) -> Self {
        PointerPatch {
            prev: Some(to),
            next: None,
        }
    }

    /// A patch that repoints `next` and leaves `prev` untouched.
    pub fn set_next(to: Option<NodeId>) -> Self {
        PointerPatch {
            prev: None,
            next: Some(to),
        }
    }

    /// Applies the pointer changes. Version bookkeeping is the caller's.
    pub fn apply(&self, node: &mut Node) {
        if let Some(prev) = self.prev {
            node.prev = prev;
        }
        if let Some(next) = self.next {
            node.next = next;
        }
    }
}
