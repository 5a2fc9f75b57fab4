//! The client session service: one bidirectional stream per attached client.
//!
//! On attach the session is registered with the hub *before* the snapshot is
//! read, so no committed delta can fall between the snapshot and the first
//! forwarded event; a delta that overlaps the snapshot is applied
//! idempotently by the client. Mutation requests run through the retry
//! driver; successful outcomes are broadcast to every session, failures are
//! reported only on the originating stream.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Request, Response, Status, Streaming};
use tracing::{debug, warn};

use crate::engine::{self, retry};
use crate::hub::{ListEvent, ListHub};
use crate::listdpb::list_session_server::ListSession;
use crate::listdpb::*;
use crate::storage::{ListStore, NodeId, PointerPatch};

pub struct SessionService {
    store: Arc<ListStore>,
    hub: Arc<ListHub>,

    /// Origins accepted on attach; empty allows every origin.
    allowed_origins: Vec<String>,

    /// Retry driver attempt budget per mutation.
    max_attempts: u32,
}

impl SessionService {
    pub fn new(
        store: Arc<ListStore>,
        hub: Arc<ListHub>,
        allowed_origins: Vec<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            hub,
            allowed_origins,
            max_attempts,
        }
    }

    /// Enforces the configured origin policy against the `origin` request
    /// metadata.
    fn check_origin(&self, request: &Request<Streaming<ClientMessage>>) -> Result<(), Status> {
        if self.allowed_origins.is_empty() {
            return Ok(());
        }

        let origin = request
            .metadata()
            .get("origin")
            .and_then(|value| value.to_str().ok());

        match origin {
            Some(origin)
                if self
                    .allowed_origins
                    .iter()
                    .any(|allowed| allowed == origin || allowed == "*") =>
            {
                Ok(())
            }
            _ => Err(Status::new(
                Code::PermissionDenied,
                "origin not allowed by server policy",
            )),
        }
    }
}

#[tonic::async_trait]
impl ListSession for SessionService {
    type AttachStream = ReceiverStream<Result<ServerMessage, Status>>;

    async fn attach(
        &self,
        request: Request<Streaming<ClientMessage>>,
    ) -> Result<Response<Self::AttachStream>, Status> {
        self.check_origin(&request)?;

        let mut stream = request.into_inner();
        let (tx, rx) = mpsc::channel(128);

        // Register before snapshotting: anything committed after this point
        // arrives as a delta, anything before is in the snapshot, and the
        // overlap is harmless because deltas apply idempotently.
        let (session_id, mut events) = self.hub.register();

        let snapshot = match self.store.snapshot() {
            Ok(nodes) => nodes,
            Err(e) => {
                self.hub.unregister(session_id);
                return Err(Status::new(Code::Internal, format!("snapshot failed: {e}")));
            }
        };
        debug!(session_id, nodes = snapshot.len(), "session attached");

        let nodes_msg = ServerMessage {
            msg: Some(server_message::Msg::Nodes(NodeList {
                nodes: snapshot.iter().map(to_wire_node).collect(),
            })),
        };
        if tx.send(Ok(nodes_msg)).await.is_err() {
            self.hub.unregister(session_id);
            return Err(Status::new(Code::Internal, "session stream closed"));
        }

        // Forward hub events to this client's stream.
        let forward_tx = tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if forward_tx.send(Ok(to_wire_event(event))).await.is_err() {
                    break;
                }
            }
        });

        // Drive the client's requests until the stream ends.
        let store = self.store.clone();
        let hub = self.hub.clone();
        let max_attempts = self.max_attempts;
        tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(message)) => {
                        let Some(msg) = message.msg else {
                            continue;
                        };
                        match msg {
                            client_message::Msg::AddNode(req) => {
                                handle_add_node(&store, &hub, &tx, session_id, max_attempts, req)
                                    .await;
                            }
                            client_message::Msg::RemoveNode(req) => {
                                handle_remove_node(&store, &hub, &tx, session_id, max_attempts, req)
                                    .await;
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(session_id, "client closed session stream");
                        break;
                    }
                    Err(status) => {
                        debug!(session_id, error = %status, "session stream error");
                        break;
                    }
                }
            }

            hub.unregister(session_id);
            forward.abort();
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

async fn handle_add_node(
    store: &ListStore,
    hub: &ListHub,
    tx: &mpsc::Sender<Result<ServerMessage, Status>>,
    session_id: u64,
    max_attempts: u32,
    req: AddNodeRequest,
) {
    let prev = match req.prev_node_id.as_deref().map(NodeId::parse).transpose() {
        Ok(prev) => prev,
        Err(e) => {
            let _ = tx.send(Ok(error_message(e.to_string(), "addNode"))).await;
            return;
        }
    };

    match retry::with_retry(store, max_attempts, |txn| engine::insert_after(txn, prev)) {
        Ok(outcome) => {
            debug!(session_id, node_id = %outcome.created.id, "node added");
            hub.broadcast(ListEvent::Added {
                created: outcome.created,
                updated: outcome.updated,
            });
        }
        Err(e) => {
            warn!(session_id, error = %e, "addNode failed");
            let _ = tx.send(Ok(error_message(e.to_string(), "addNode"))).await;
        }
    }
}

async fn handle_remove_node(
    store: &ListStore,
    hub: &ListHub,
    tx: &mpsc::Sender<Result<ServerMessage, Status>>,
    session_id: u64,
    max_attempts: u32,
    req: RemoveNodeRequest,
) {
    let node_id = match NodeId::parse(&req.node_id) {
        Ok(id) => id,
        Err(e) => {
            let _ = tx
                .send(Ok(error_message(e.to_string(), "removeNode")))
                .await;
            return;
        }
    };

    match retry::with_retry(store, max_attempts, |txn| engine::delete(txn, node_id)) {
        Ok(outcome) => {
            debug!(session_id, node_id = %outcome.deleted, "node removed");
            hub.broadcast(ListEvent::Removed {
                deleted: outcome.deleted,
                updated: outcome.updated,
            });
        }
        Err(e) => {
            warn!(session_id, error = %e, "removeNode failed");
            let _ = tx
                .send(Ok(error_message(e.to_string(), "removeNode")))
                .await;
        }
    }
}

fn to_wire_node(node: &crate::storage::Node) -> Node {
    Node {
        id: node.id.to_string(),
        prev: node.prev.map(|id| id.to_string()),
        next: node.next.map(|id| id.to_string()),
        version: node.version,
    }
}

fn to_wire_ref(target: Option<NodeId>) -> NodeRef {
    NodeRef {
        id: target.map(|id| id.to_string()).unwrap_or_default(),
    }
}

fn to_wire_updated(updated: &BTreeMap<NodeId, PointerPatch>) -> HashMap<String, PointerDelta> {
    updated
        .iter()
        .map(|(id, patch)| {
            (
                id.to_string(),
                PointerDelta {
                    prev: patch.prev.map(to_wire_ref),
                    next: patch.next.map(to_wire_ref),
                },
            )
        })
        .collect()
}

fn to_wire_event(event: ListEvent) -> ServerMessage {
    match event {
        ListEvent::Added { created, updated } => ServerMessage {
            msg: Some(server_message::Msg::NodeAdded(NodeAdded {
                created: Some(to_wire_node(&created)),
                updated: to_wire_updated(&updated),
            })),
        },
        ListEvent::Removed { deleted, updated } => ServerMessage {
            msg: Some(server_message::Msg::NodeRemoved(NodeRemoved {
                deleted_node_id: deleted.to_string(),
                updated: to_wire_updated(&updated),
            })),
        },
    }
}

fn error_message(message: String, operation: &str) -> ServerMessage {
    ServerMessage {
        msg: Some(server_message::Msg::Error(OpError {
            message,
            operation: operation.to_string(),
        })),
    }
}
