//! Session hub: fan-out of committed list deltas to attached clients.
//!
//! Every attached client session registers a bounded event channel here.
//! After a mutation commits, the session handler broadcasts the resulting
//! delta to every registered session — including the originator, which
//! applies it idempotently like everyone else. Delivery order across
//! sessions is not coordinated; deltas address nodes by id, so clients can
//! apply them in any arrival order.
//!
//! A session whose channel is closed or full is evicted from the registry:
//! a client that cannot keep up re-attaches and starts over from a fresh
//! snapshot rather than stalling every other session's broadcasts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::storage::{Node, NodeId, PointerPatch};

/// Capacity of each session's event channel.
const EVENT_BUFFER: usize = 256;

/// A committed list mutation, fanned out to every attached session.
#[derive(Clone, Debug)]
pub enum ListEvent {
    Added {
        created: Node,
        updated: BTreeMap<NodeId, PointerPatch>,
    },
    Removed {
        deleted: NodeId,
        updated: BTreeMap<NodeId, PointerPatch>,
    },
}

/// The hub manages all attached sessions and dispatches events.
pub struct ListHub {
    /// Map of session_id -> event sender
    sessions: DashMap<u64, mpsc::Sender<ListEvent>>,

    /// Counter for generating unique session IDs
    next_session_id: AtomicU64,
}

impl ListHub {
    pub fn new() -> Arc<Self> {
        Arc::new(ListHub {
            sessions: DashMap::new(),
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Registers a new session and returns its id and event receiver.
    pub fn register(&self) -> (u64, mpsc::Receiver<ListEvent>) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.sessions.insert(session_id, tx);
        debug!(session_id, "session registered");
        (session_id, rx)
    }

    /// Removes a session from the registry.
    pub fn unregister(&self, session_id: u64) {
        if self.sessions.remove(&session_id).is_some() {
            debug!(session_id, "session unregistered");
        }
    }

    /// Delivers an event to every registered session.
    ///
    /// Called by the session handler after each committed mutation.
    pub fn broadcast(&self, event: ListEvent) {
        let mut evicted = Vec::new();

        for entry in self.sessions.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session_id = *entry.key(), "session event channel full; evicting");
                    evicted.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(session_id = *entry.key(), "session event channel closed");
                    evicted.push(*entry.key());
                }
            }
        }

        for session_id in evicted {
            self.sessions.remove(&session_id);
        }
    }

    /// Number of currently attached sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added_event() -> ListEvent {
        ListEvent::Added {
            created: Node::new(None, None),
            updated: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session() {
        let hub = ListHub::new();
        let (_id_a, mut rx_a) = hub.register();
        let (_id_b, mut rx_b) = hub.register();

        hub.broadcast(added_event());

        assert!(matches!(rx_a.recv().await, Some(ListEvent::Added { .. })));
        assert!(matches!(rx_b.recv().await, Some(ListEvent::Added { .. })));
    }

    #[tokio::test]
    async fn test_unregistered_session_receives_nothing() {
        let hub = ListHub::new();
        let (id_a, mut rx_a) = hub.register();
        let (_id_b, _rx_b) = hub.register();

        hub.unregister(id_a);
        hub.broadcast(added_event());

        assert!(rx_a.recv().await.is_none(), "channel should be dropped");
        assert_eq!(hub.session_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_evicted_on_broadcast() {
        let hub = ListHub::new();
        let (_id_a, rx_a) = hub.register();
        let (_id_b, mut rx_b) = hub.register();
        drop(rx_a);

        hub.broadcast(added_event());

        assert_eq!(hub.session_count(), 1);
        assert!(matches!(rx_b.recv().await, Some(ListEvent::Added { .. })));
    }
}
