//! Request/response correlation by JSON-RPC id.
//!
//! Each outgoing request gets a fresh id and a oneshot completion handle.
//! Whoever removes the handle from the pending map (a response, a timeout, or
//! teardown) is the only one that can complete it.

use crate::error::McpError;
use crate::jsonrpc::RequestId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, oneshot};

/// Outcome delivered to a waiting caller.
pub type Completion = Result<serde_json::Value, McpError>;

#[derive(Default)]
struct PendingState {
    handles: HashMap<RequestId, oneshot::Sender<Completion>>,
    closed: bool,
}

/// Issues request ids and routes responses back to their callers.
pub struct Correlator {
    next_id: AtomicU32,
    pending: Mutex<PendingState>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            pending: Mutex::new(PendingState::default()),
        }
    }

    /// Next request id. Starts at 1 and never repeats.
    pub fn next_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Store a completion handle for `id`. Must be called before the request
    /// is written, so a fast reply always finds its handle.
    ///
    /// Fails with [`McpError::ConnectionClosed`] once [`Self::cancel_all`] has
    /// run.
    pub async fn register(&self, id: RequestId) -> Result<oneshot::Receiver<Completion>, McpError> {
        let mut pending = self.pending.lock().await;
        if pending.closed {
            return Err(McpError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        pending.handles.insert(id, tx);
        Ok(rx)
    }

    /// Complete `id` with a result. Returns `false` if the id was unknown.
    pub async fn resolve(&self, id: RequestId, result: serde_json::Value) -> bool {
        self.complete(id, Ok(result)).await
    }

    /// Complete `id` with an error. Returns `false` if the id was unknown.
    pub async fn reject(&self, id: RequestId, error: McpError) -> bool {
        self.complete(id, Err(error)).await
    }

    /// Drop the handle for `id` without completing it (the caller stopped
    /// waiting). Returns `false` if the id was already gone.
    pub async fn discard(&self, id: RequestId) -> bool {
        self.pending.lock().await.handles.remove(&id).is_some()
    }

    /// Reject every pending handle with [`McpError::ConnectionClosed`] and
    /// refuse further registrations. Returns how many were rejected.
    pub async fn cancel_all(&self) -> usize {
        let handles = {
            let mut pending = self.pending.lock().await;
            pending.closed = true;
            std::mem::take(&mut pending.handles)
        };
        let count = handles.len();
        for (_, tx) in handles {
            let _ = tx.send(Err(McpError::ConnectionClosed));
        }
        count
    }

    /// Number of requests still awaiting a reply.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.handles.len()
    }

    async fn complete(&self, id: RequestId, outcome: Completion) -> bool {
        let handle = self.pending.lock().await.handles.remove(&id);
        match handle {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::debug!(id, "Caller stopped waiting before response arrived");
                }
                true
            }
            None => {
                tracing::debug!(id, "Discarding response for unknown request id");
                false
            }
        }
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}
