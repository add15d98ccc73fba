use crate::error::DhtError;
use crate::message::{QueryKind, Response};
use crate::node::NodeId;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::oneshot;

/// The lifecycle state of one outgoing query.
///
/// A task is registered under its transaction id when the query is first
/// sent and lives in the pending registry until a matching response or
/// error arrives, or its final timeout fires — whichever happens first
/// removes it, exactly once. The encoded payload is kept so retries
/// resend the identical datagram under the same transaction id.
#[derive(Debug)]
pub struct SendQueryTask {
    pub kind: QueryKind,
    pub addr: SocketAddr,
    /// Id of the queried node when it is known to the routing table;
    /// timeouts are only charged against tracked nodes.
    pub node_id: Option<NodeId>,
    pub payload: Bytes,
    /// 1-based attempt counter; timer callbacks carry the attempt they
    /// were armed for, so a stale timer after a resend is a no-op.
    pub attempt: u32,
    max_retries: u32,
    done: oneshot::Sender<Result<Response, DhtError>>,
}

impl SendQueryTask {
    pub fn new(
        kind: QueryKind,
        addr: SocketAddr,
        node_id: Option<NodeId>,
        payload: Bytes,
        max_retries: u32,
        done: oneshot::Sender<Result<Response, DhtError>>,
    ) -> Self {
        Self {
            kind,
            addr,
            node_id,
            payload,
            attempt: 1,
            max_retries: max_retries.max(1),
            done,
        }
    }

    /// Whether the attempt that just timed out was the last one allowed.
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_retries
    }

    /// Advances to the next attempt and returns its number.
    pub fn next_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Completes the task, consuming it. The caller may have dropped the
    /// receiving end (fire-and-forget probes); that is not an error.
    pub fn complete(self, result: Result<Response, DhtError>) {
        let _ = self.done.send(result);
    }
}
