//! # listd: a collaborative shared-list service
//!
//! listd hosts a persistent doubly-linked list of anonymous, version-stamped
//! nodes that many clients edit concurrently over bidirectional gRPC
//! streams. It provides:
//!
//! - **Optimistic concurrency control**: every structural write is guarded
//!   by the version and continuity pointer observed in the same session
//! - **Transactional multi-node updates**: an insert or delete touches up to
//!   three rows and commits them atomically or not at all
//! - **Retryable vs permanent conflicts**: lost write races re-run with
//!   fresh reads; missing anchors surface to the requesting client
//! - **Change fan-out**: every committed mutation is broadcast to all
//!   attached sessions as an id-addressed delta
//!
//! # Usage
//!
//! ```bash
//! listd --name list-node1 \
//!       --data-dir ./list.data \
//!       --listen-client-urls http://localhost:4020
//! ```

// Re-export generated protobuf types
pub mod listdpb {
    tonic::include_proto!("listdpb");
}

// Core modules
pub mod api;
pub mod engine;
pub mod hub;
pub mod server;
pub mod storage;

// Re-export main types at crate root for convenience
pub use engine::{DeleteOutcome, InsertOutcome, MutationError};
pub use hub::{ListEvent, ListHub};
pub use server::{ListdServer, ServerConfig};
pub use storage::{Backend, ListStore, Node, NodeId, PointerPatch};
