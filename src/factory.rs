use crate::error::DhtError;
use crate::message::{QueryKind, RawResponse, Response, TransactionId};
use crate::task::SendQueryTask;
use bytes::Bytes;
use std::collections::HashMap;

/// The pending-transaction registry.
///
/// One instance per engine, created at engine construction — never a
/// process-wide table, so engines in the same process (tests run many)
/// cannot see each other's transactions. Exactly one entry exists per
/// in-flight transaction id, and it is removed exactly once by whichever
/// of response, error, or final timeout wins.
#[derive(Debug)]
pub struct MessageFactory {
    pending: HashMap<TransactionId, SendQueryTask>,
    max_pending: usize,
}

impl MessageFactory {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: HashMap::new(),
            max_pending,
        }
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.max_pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// A fresh two-byte transaction id, re-drawn until it does not
    /// collide with anything in flight.
    pub fn next_transaction_id(&self) -> TransactionId {
        loop {
            let raw: [u8; 2] = rand::random();
            let tid = Bytes::copy_from_slice(&raw);
            if !self.pending.contains_key(&tid) {
                return tid;
            }
        }
    }

    /// Registers a task under `tid`. Registering an id that is already
    /// in flight is a distinct, observable error (it indicates a caller
    /// bug); the task is handed back so its completion can be failed.
    pub fn register(
        &mut self,
        tid: TransactionId,
        task: SendQueryTask,
    ) -> Result<(), (SendQueryTask, DhtError)> {
        // A colliding id is a caller bug and must be reported as such
        // even when the registry is also at capacity.
        if self.pending.contains_key(&tid) {
            return Err((task, DhtError::DuplicateTransaction));
        }

        if self.is_full() {
            return Err((task, DhtError::TooManyQueries));
        }

        self.pending.insert(tid, task);
        Ok(())
    }

    /// Removes and returns the pending task for `tid`, or `None` when
    /// the transaction is unknown — duplicates and post-timeout
    /// stragglers land here and are dropped by the caller.
    pub fn unregister(&mut self, tid: &TransactionId) -> Option<SendQueryTask> {
        self.pending.remove(tid)
    }

    pub fn get(&self, tid: &TransactionId) -> Option<&SendQueryTask> {
        self.pending.get(tid)
    }

    pub fn get_mut(&mut self, tid: &TransactionId) -> Option<&mut SendQueryTask> {
        self.pending.get_mut(tid)
    }

    /// Empties the registry, returning every outstanding task; used at
    /// shutdown to fail their completions.
    pub fn drain(&mut self) -> Vec<SendQueryTask> {
        self.pending.drain().map(|(_, task)| task).collect()
    }

    /// Types a raw response dictionary against the query kind that was
    /// registered for its transaction — the response itself does not say
    /// which query it answers.
    pub fn decode_response(kind: QueryKind, raw: RawResponse) -> Response {
        match kind {
            QueryKind::Ping => Response::Ping { id: raw.id },
            QueryKind::FindNode => Response::FindNode {
                id: raw.id,
                nodes: raw.nodes.unwrap_or_default(),
            },
            QueryKind::GetPeers => Response::GetPeers {
                id: raw.id,
                token: raw.token.unwrap_or_default(),
                peers: raw.peers,
                nodes: raw.nodes,
            },
            QueryKind::AnnouncePeer => Response::AnnouncePeer { id: raw.id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Incoming, IncomingEvent, Message};
    use crate::node::{Node, NodeId};
    use tokio::sync::oneshot;

    fn task() -> (SendQueryTask, oneshot::Receiver<Result<Response, DhtError>>) {
        let (tx, rx) = oneshot::channel();
        let task = SendQueryTask::new(
            QueryKind::Ping,
            "1.2.3.4:6881".parse().unwrap(),
            None,
            Bytes::from_static(b"payload"),
            4,
            tx,
        );
        (task, rx)
    }

    #[test]
    fn register_rejects_duplicate_transaction_id() {
        let mut factory = MessageFactory::new(16);
        let tid = Bytes::from_static(b"aa");

        let (first, _rx1) = task();
        factory.register(tid.clone(), first).unwrap();

        let (second, _rx2) = task();
        let (_, err) = factory.register(tid.clone(), second).unwrap_err();
        assert!(matches!(err, DhtError::DuplicateTransaction));

        // The original registration is untouched.
        assert!(factory.get(&tid).is_some());
        assert_eq!(factory.len(), 1);
    }

    #[test]
    fn duplicate_id_reported_even_at_capacity() {
        let mut factory = MessageFactory::new(1);
        let tid = Bytes::from_static(b"aa");

        let (first, _rx1) = task();
        factory.register(tid.clone(), first).unwrap();

        let (second, _rx2) = task();
        let (_, err) = factory.register(tid, second).unwrap_err();
        assert!(matches!(err, DhtError::DuplicateTransaction));
    }

    #[test]
    fn register_enforces_capacity() {
        let mut factory = MessageFactory::new(1);

        let (first, _rx1) = task();
        factory.register(Bytes::from_static(b"aa"), first).unwrap();

        let (second, _rx2) = task();
        let (_, err) = factory
            .register(Bytes::from_static(b"bb"), second)
            .unwrap_err();
        assert!(matches!(err, DhtError::TooManyQueries));
    }

    #[test]
    fn unregister_removes_exactly_once() {
        let mut factory = MessageFactory::new(16);
        let tid = Bytes::from_static(b"aa");

        let (pending, _rx) = task();
        factory.register(tid.clone(), pending).unwrap();

        assert!(factory.unregister(&tid).is_some());
        assert!(factory.unregister(&tid).is_none());
    }

    #[test]
    fn next_transaction_id_avoids_in_flight_ids() {
        let mut factory = MessageFactory::new(16);

        let (pending, _rx) = task();
        let tid = factory.next_transaction_id();
        factory.register(tid.clone(), pending).unwrap();

        for _ in 0..100 {
            assert_ne!(factory.next_transaction_id(), tid);
        }
    }

    fn roundtrip(kind: QueryKind, response: Response) -> Response {
        let encoded = Message::response(Bytes::from_static(b"tt"), response)
            .encode()
            .unwrap();

        match Incoming::decode(&encoded).unwrap().event {
            IncomingEvent::Response(raw) => MessageFactory::decode_response(kind, raw),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn ping_response_types_by_registered_kind() {
        let id = NodeId::generate();
        match roundtrip(QueryKind::Ping, Response::Ping { id }) {
            Response::Ping { id: got } => assert_eq!(got, id),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn find_node_response_roundtrips() {
        let id = NodeId::generate();
        let node = Node::new(NodeId([3u8; 20]), "9.9.9.9:6881".parse().unwrap());

        match roundtrip(
            QueryKind::FindNode,
            Response::FindNode {
                id,
                nodes: vec![node.clone()],
            },
        ) {
            Response::FindNode { id: got, nodes } => {
                assert_eq!(got, id);
                assert_eq!(nodes.len(), 1);
                assert_eq!(nodes[0].id, node.id);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn get_peers_response_roundtrips_with_peers_and_token() {
        let id = NodeId::generate();
        let peer: std::net::SocketAddr = "8.8.8.8:1234".parse().unwrap();

        match roundtrip(
            QueryKind::GetPeers,
            Response::GetPeers {
                id,
                token: Bytes::from_static(b"tok"),
                peers: Some(vec![peer]),
                nodes: None,
            },
        ) {
            Response::GetPeers { token, peers, .. } => {
                assert_eq!(token, Bytes::from_static(b"tok"));
                assert_eq!(peers.as_deref(), Some(&[peer][..]));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn announce_peer_response_roundtrips() {
        let id = NodeId::generate();
        match roundtrip(QueryKind::AnnouncePeer, Response::AnnouncePeer { id }) {
            Response::AnnouncePeer { id: got } => assert_eq!(got, id),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn completing_a_task_delivers_to_the_waiter() {
        let (pending, rx) = task();
        pending.complete(Ok(Response::Ping {
            id: NodeId::generate(),
        }));

        assert!(rx.await.unwrap().is_ok());
    }
}
