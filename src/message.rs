//! KRPC message hierarchy.
//!
//! Every datagram is a bencoded dictionary with a transaction id `t` and
//! a type tag `y` (`q` query, `r` response, `e` error). Outgoing traffic
//! is built from the typed [`Message`]; incoming datagrams decode to an
//! [`Incoming`], whose response bodies stay *raw* until the engine looks
//! up the query kind registered under the transaction id — a bare `r`
//! dictionary does not say which query it answers.

use crate::bencode::{decode, encode, Value};
use crate::error::DhtError;
use crate::node::{Node, NodeId};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub type TransactionId = Bytes;

/// Identifier of a shared content item; shares the id space with node ids.
pub type InfoHash = [u8; 20];

/// The four mainline DHT query types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Ping,
    FindNode,
    GetPeers,
    AnnouncePeer,
}

impl QueryKind {
    pub fn name(&self) -> &'static str {
        match self {
            QueryKind::Ping => "ping",
            QueryKind::FindNode => "find_node",
            QueryKind::GetPeers => "get_peers",
            QueryKind::AnnouncePeer => "announce_peer",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Query {
    Ping,
    FindNode {
        target: NodeId,
    },
    GetPeers {
        info_hash: InfoHash,
    },
    AnnouncePeer {
        info_hash: InfoHash,
        port: u16,
        token: Bytes,
        implied_port: bool,
    },
}

impl Query {
    pub fn kind(&self) -> QueryKind {
        match self {
            Query::Ping => QueryKind::Ping,
            Query::FindNode { .. } => QueryKind::FindNode,
            Query::GetPeers { .. } => QueryKind::GetPeers,
            Query::AnnouncePeer { .. } => QueryKind::AnnouncePeer,
        }
    }
}

/// A fully typed response, produced either by our own query handlers or
/// by typing a [`RawResponse`] against its pending query kind.
#[derive(Debug, Clone)]
pub enum Response {
    Ping {
        id: NodeId,
    },
    FindNode {
        id: NodeId,
        nodes: Vec<Node>,
    },
    GetPeers {
        id: NodeId,
        token: Bytes,
        peers: Option<Vec<SocketAddr>>,
        nodes: Option<Vec<Node>>,
    },
    AnnouncePeer {
        id: NodeId,
    },
}

impl Response {
    pub fn id(&self) -> &NodeId {
        match self {
            Response::Ping { id }
            | Response::FindNode { id, .. }
            | Response::GetPeers { id, .. }
            | Response::AnnouncePeer { id } => id,
        }
    }
}

/// Body of a KRPC error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

impl ErrorBody {
    pub const GENERIC: i64 = 201;
    pub const PROTOCOL: i64 = 203;
    pub const METHOD_UNKNOWN: i64 = 204;

    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            code: Self::GENERIC,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            code: Self::PROTOCOL,
            message: message.into(),
        }
    }

    pub fn invalid_token() -> Self {
        Self {
            code: Self::PROTOCOL,
            message: "Invalid token".to_string(),
        }
    }

    pub fn method_unknown(name: &str) -> Self {
        Self {
            code: Self::METHOD_UNKNOWN,
            message: format!("Method Unknown: {}", name),
        }
    }
}

/// An outgoing KRPC message.
#[derive(Debug, Clone)]
pub struct Message {
    pub transaction_id: TransactionId,
    pub body: MessageBody,
}

#[derive(Debug, Clone)]
pub enum MessageBody {
    Query { sender: NodeId, query: Query },
    Response(Response),
    Error(ErrorBody),
}

/// An incoming datagram after parsing but before transaction matching.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub transaction_id: TransactionId,
    pub event: IncomingEvent,
}

#[derive(Debug, Clone)]
pub enum IncomingEvent {
    Query { sender: NodeId, query: Query },
    Response(RawResponse),
    Error(ErrorBody),
}

/// The common fields of an `r` dictionary, untyped until matched to the
/// query that produced it.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub id: NodeId,
    pub nodes: Option<Vec<Node>>,
    pub peers: Option<Vec<SocketAddr>>,
    pub token: Option<Bytes>,
}

/// A decode failure, carrying the transaction id when one could still be
/// recovered so the engine can answer with a KRPC error instead of a
/// silent drop.
#[derive(Debug)]
pub struct DecodeError {
    pub transaction_id: Option<TransactionId>,
    pub error: DhtError,
}

impl DecodeError {
    fn bare(error: DhtError) -> Self {
        Self {
            transaction_id: None,
            error,
        }
    }
}

fn key(k: &'static [u8]) -> Bytes {
    Bytes::from_static(k)
}

fn id_bytes(id: &NodeId) -> Value {
    Value::Bytes(Bytes::copy_from_slice(id.as_bytes()))
}

/// Concatenated 26-byte compact entries for every IPv4 node.
pub fn encode_compact_nodes(nodes: &[Node]) -> Bytes {
    let compact: Vec<u8> = nodes
        .iter()
        .filter_map(|n| n.to_compact())
        .flatten()
        .collect();
    Bytes::from(compact)
}

pub fn decode_compact_nodes(data: &[u8]) -> Vec<Node> {
    data.chunks_exact(26).filter_map(Node::from_compact).collect()
}

fn encode_compact_peer(addr: &SocketAddr) -> Option<[u8; 6]> {
    let SocketAddr::V4(v4) = addr else {
        return None;
    };

    let mut compact = [0u8; 6];
    compact[..4].copy_from_slice(&v4.ip().octets());
    compact[4..6].copy_from_slice(&v4.port().to_be_bytes());
    Some(compact)
}

fn decode_compact_peer(data: &[u8]) -> Option<SocketAddr> {
    if data.len() != 6 {
        return None;
    }

    let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
    let port = u16::from_be_bytes([data[4], data[5]]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

impl Message {
    pub fn query(transaction_id: TransactionId, sender: NodeId, query: Query) -> Self {
        Self {
            transaction_id,
            body: MessageBody::Query { sender, query },
        }
    }

    pub fn response(transaction_id: TransactionId, response: Response) -> Self {
        Self {
            transaction_id,
            body: MessageBody::Response(response),
        }
    }

    pub fn error(transaction_id: TransactionId, body: ErrorBody) -> Self {
        Self {
            transaction_id,
            body: MessageBody::Error(body),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, DhtError> {
        let mut dict = BTreeMap::new();
        dict.insert(key(b"t"), Value::Bytes(self.transaction_id.clone()));

        match &self.body {
            MessageBody::Query { sender, query } => {
                dict.insert(key(b"y"), Value::string("q"));
                dict.insert(key(b"q"), Value::string(query.kind().name()));

                let mut args = BTreeMap::new();
                args.insert(key(b"id"), id_bytes(sender));

                match query {
                    Query::Ping => {}
                    Query::FindNode { target } => {
                        args.insert(key(b"target"), id_bytes(target));
                    }
                    Query::GetPeers { info_hash } => {
                        args.insert(
                            key(b"info_hash"),
                            Value::Bytes(Bytes::copy_from_slice(info_hash)),
                        );
                    }
                    Query::AnnouncePeer {
                        info_hash,
                        port,
                        token,
                        implied_port,
                    } => {
                        args.insert(
                            key(b"info_hash"),
                            Value::Bytes(Bytes::copy_from_slice(info_hash)),
                        );
                        args.insert(key(b"port"), Value::Integer(*port as i64));
                        args.insert(key(b"token"), Value::Bytes(token.clone()));
                        if *implied_port {
                            args.insert(key(b"implied_port"), Value::Integer(1));
                        }
                    }
                }

                dict.insert(key(b"a"), Value::Dict(args));
            }
            MessageBody::Response(response) => {
                dict.insert(key(b"y"), Value::string("r"));

                let mut resp = BTreeMap::new();
                resp.insert(key(b"id"), id_bytes(response.id()));

                match response {
                    Response::Ping { .. } | Response::AnnouncePeer { .. } => {}
                    Response::FindNode { nodes, .. } => {
                        resp.insert(key(b"nodes"), Value::Bytes(encode_compact_nodes(nodes)));
                    }
                    Response::GetPeers {
                        token,
                        peers,
                        nodes,
                        ..
                    } => {
                        resp.insert(key(b"token"), Value::Bytes(token.clone()));

                        if let Some(peers) = peers {
                            let values: Vec<Value> = peers
                                .iter()
                                .filter_map(|addr| encode_compact_peer(addr))
                                .map(|compact| Value::Bytes(Bytes::copy_from_slice(&compact)))
                                .collect();
                            resp.insert(key(b"values"), Value::List(values));
                        }

                        if let Some(nodes) = nodes {
                            resp.insert(key(b"nodes"), Value::Bytes(encode_compact_nodes(nodes)));
                        }
                    }
                }

                dict.insert(key(b"r"), Value::Dict(resp));
            }
            MessageBody::Error(body) => {
                dict.insert(key(b"y"), Value::string("e"));
                dict.insert(
                    key(b"e"),
                    Value::List(vec![
                        Value::Integer(body.code),
                        Value::string(&body.message),
                    ]),
                );
            }
        }

        Ok(encode(&Value::Dict(dict))?)
    }
}

impl Incoming {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let value = decode(data).map_err(|e| DecodeError::bare(e.into()))?;

        let dict = value
            .as_dict()
            .ok_or_else(|| DecodeError::bare(DhtError::Protocol("expected dict".into())))?;

        let transaction_id = dict
            .get(b"t".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or_else(|| {
                DecodeError::bare(DhtError::Protocol("missing transaction id".into()))
            })?;

        let fail = |error: DhtError| DecodeError {
            transaction_id: Some(transaction_id.clone()),
            error,
        };

        let msg_type = dict
            .get(b"y".as_slice())
            .and_then(|v| v.as_str())
            .ok_or_else(|| fail(DhtError::Protocol("missing message type".into())))?;

        let event = match msg_type {
            "q" => Self::decode_query(dict).map_err(fail)?,
            "r" => Self::decode_response(dict).map_err(fail)?,
            "e" => Self::decode_error(dict).map_err(fail)?,
            other => {
                return Err(fail(DhtError::Protocol(format!(
                    "unknown message type: {}",
                    other
                ))))
            }
        };

        Ok(Self {
            transaction_id,
            event,
        })
    }

    fn decode_query(dict: &BTreeMap<Bytes, Value>) -> Result<IncomingEvent, DhtError> {
        let name = dict
            .get(b"q".as_slice())
            .and_then(|v| v.as_str())
            .ok_or_else(|| DhtError::Protocol("missing query name".into()))?;

        let args = dict
            .get(b"a".as_slice())
            .and_then(|v| v.as_dict())
            .ok_or_else(|| DhtError::Protocol("missing query args".into()))?;

        let sender = args
            .get(b"id".as_slice())
            .and_then(|v| v.as_bytes())
            .and_then(|b| NodeId::from_bytes(b).ok())
            .ok_or_else(|| DhtError::Protocol("missing sender id".into()))?;

        let query = match name {
            "ping" => Query::Ping,
            "find_node" => Query::FindNode {
                target: required_id(args, b"target")?,
            },
            "get_peers" => Query::GetPeers {
                info_hash: required_hash(args, b"info_hash")?,
            },
            "announce_peer" => {
                let port = args
                    .get(b"port".as_slice())
                    .and_then(|v| v.as_integer())
                    .filter(|p| (0..=u16::MAX as i64).contains(p))
                    .ok_or_else(|| DhtError::Protocol("missing port".into()))?;

                let token = args
                    .get(b"token".as_slice())
                    .and_then(|v| v.as_bytes())
                    .cloned()
                    .ok_or_else(|| DhtError::Protocol("missing token".into()))?;

                let implied_port = args
                    .get(b"implied_port".as_slice())
                    .and_then(|v| v.as_integer())
                    .map(|v| v == 1)
                    .unwrap_or(false);

                Query::AnnouncePeer {
                    info_hash: required_hash(args, b"info_hash")?,
                    port: port as u16,
                    token,
                    implied_port,
                }
            }
            other => return Err(DhtError::UnsupportedQuery(other.to_string())),
        };

        Ok(IncomingEvent::Query { sender, query })
    }

    fn decode_response(dict: &BTreeMap<Bytes, Value>) -> Result<IncomingEvent, DhtError> {
        let resp = dict
            .get(b"r".as_slice())
            .and_then(|v| v.as_dict())
            .ok_or_else(|| DhtError::Protocol("missing response dict".into()))?;

        let id = resp
            .get(b"id".as_slice())
            .and_then(|v| v.as_bytes())
            .and_then(|b| NodeId::from_bytes(b).ok())
            .ok_or_else(|| DhtError::Protocol("missing responder id".into()))?;

        let nodes = resp
            .get(b"nodes".as_slice())
            .and_then(|v| v.as_bytes())
            .map(|data| decode_compact_nodes(data));

        let peers = resp.get(b"values".as_slice()).and_then(|v| v.as_list()).map(
            |list| {
                list.iter()
                    .filter_map(|v| v.as_bytes())
                    .filter_map(|b| decode_compact_peer(b))
                    .collect()
            },
        );

        let token = resp
            .get(b"token".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned();

        Ok(IncomingEvent::Response(RawResponse {
            id,
            nodes,
            peers,
            token,
        }))
    }

    fn decode_error(dict: &BTreeMap<Bytes, Value>) -> Result<IncomingEvent, DhtError> {
        let list = dict
            .get(b"e".as_slice())
            .and_then(|v| v.as_list())
            .ok_or_else(|| DhtError::Protocol("missing error list".into()))?;

        let code = list.first().and_then(|v| v.as_integer()).unwrap_or(0);
        let message = list
            .get(1)
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string();

        Ok(IncomingEvent::Error(ErrorBody { code, message }))
    }
}

fn required_id(args: &BTreeMap<Bytes, Value>, name: &[u8]) -> Result<NodeId, DhtError> {
    args.get(name)
        .and_then(|v| v.as_bytes())
        .and_then(|b| NodeId::from_bytes(b).ok())
        .ok_or_else(|| {
            DhtError::Protocol(format!("missing {}", String::from_utf8_lossy(name)))
        })
}

fn required_hash(args: &BTreeMap<Bytes, Value>, name: &[u8]) -> Result<InfoHash, DhtError> {
    Ok(required_id(args, name)?.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(bytes: &'static [u8]) -> TransactionId {
        Bytes::from_static(bytes)
    }

    fn decode_one(msg: &Message) -> Incoming {
        Incoming::decode(&msg.encode().unwrap()).unwrap()
    }

    #[test]
    fn ping_query_roundtrip() {
        let sender = NodeId::generate();
        let msg = Message::query(tid(b"aa"), sender, Query::Ping);

        let parsed = decode_one(&msg);
        assert_eq!(parsed.transaction_id, tid(b"aa"));
        match parsed.event {
            IncomingEvent::Query {
                sender: s,
                query: Query::Ping,
            } => assert_eq!(s, sender),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn find_node_query_roundtrip() {
        let sender = NodeId::generate();
        let target = NodeId::generate();
        let msg = Message::query(tid(b"bb"), sender, Query::FindNode { target });

        match decode_one(&msg).event {
            IncomingEvent::Query {
                query: Query::FindNode { target: t },
                ..
            } => assert_eq!(t, target),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn get_peers_query_roundtrip() {
        let info_hash = [0xAB; 20];
        let msg = Message::query(
            tid(b"cc"),
            NodeId::generate(),
            Query::GetPeers { info_hash },
        );

        match decode_one(&msg).event {
            IncomingEvent::Query {
                query: Query::GetPeers { info_hash: h },
                ..
            } => assert_eq!(h, info_hash),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn announce_peer_query_roundtrip() {
        let msg = Message::query(
            tid(b"dd"),
            NodeId::generate(),
            Query::AnnouncePeer {
                info_hash: [0xCD; 20],
                port: 6881,
                token: Bytes::from_static(b"tok8byte"),
                implied_port: true,
            },
        );

        match decode_one(&msg).event {
            IncomingEvent::Query {
                query:
                    Query::AnnouncePeer {
                        info_hash,
                        port,
                        token,
                        implied_port,
                    },
                ..
            } => {
                assert_eq!(info_hash, [0xCD; 20]);
                assert_eq!(port, 6881);
                assert_eq!(token, Bytes::from_static(b"tok8byte"));
                assert!(implied_port);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn response_decodes_to_raw_fields() {
        let id = NodeId::generate();
        let node = Node::new(NodeId([5u8; 20]), "1.2.3.4:6881".parse().unwrap());
        let peer: SocketAddr = "5.6.7.8:51413".parse().unwrap();

        let msg = Message::response(
            tid(b"ee"),
            Response::GetPeers {
                id,
                token: Bytes::from_static(b"tok"),
                peers: Some(vec![peer]),
                nodes: Some(vec![node.clone()]),
            },
        );

        match decode_one(&msg).event {
            IncomingEvent::Response(raw) => {
                assert_eq!(raw.id, id);
                assert_eq!(raw.token, Some(Bytes::from_static(b"tok")));
                assert_eq!(raw.peers.as_deref(), Some(&[peer][..]));
                let nodes = raw.nodes.unwrap();
                assert_eq!(nodes.len(), 1);
                assert_eq!(nodes[0].id, node.id);
                assert_eq!(nodes[0].addr, node.addr);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn error_roundtrip() {
        let msg = Message::error(tid(b"ff"), ErrorBody::invalid_token());

        match decode_one(&msg).event {
            IncomingEvent::Error(body) => {
                assert_eq!(body.code, ErrorBody::PROTOCOL);
                assert_eq!(body.message, "Invalid token");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_query_name_keeps_transaction_id() {
        let raw = b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:q4:vote1:t2:zz1:y1:qe";

        let err = Incoming::decode(raw).unwrap_err();
        assert_eq!(err.transaction_id, Some(tid(b"zz")));
        assert!(matches!(err.error, DhtError::UnsupportedQuery(name) if name == "vote"));
    }

    #[test]
    fn garbage_is_rejected_without_transaction_id() {
        let err = Incoming::decode(b"not bencode at all").unwrap_err();
        assert!(err.transaction_id.is_none());
    }

    #[test]
    fn query_missing_sender_id_is_rejected() {
        // `a` dict present but empty.
        let raw = b"d1:ade1:q4:ping1:t2:aa1:y1:qe";
        let err = Incoming::decode(raw).unwrap_err();
        assert_eq!(err.transaction_id, Some(tid(b"aa")));
        assert!(matches!(err.error, DhtError::Protocol(_)));
    }

    #[test]
    fn ipv6_nodes_are_skipped_in_compact_encoding() {
        let v6 = Node::new(NodeId([1u8; 20]), "[::1]:6881".parse().unwrap());
        let v4 = Node::new(NodeId([2u8; 20]), "1.2.3.4:6881".parse().unwrap());

        let compact = encode_compact_nodes(&[v6, v4]);
        assert_eq!(compact.len(), 26);
        assert_eq!(decode_compact_nodes(&compact).len(), 1);
    }
}
