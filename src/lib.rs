//! tidepool - A BEP-5 mainline DHT peer discovery engine
//!
//! This library implements the BitTorrent mainline DHT: a Kademlia
//! routing table over UDP with the KRPC bencode wire protocol, used to
//! find peers for a torrent without a tracker.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`node`] - Node ids, XOR distance, node liveness state
//! - [`routing`] - Kademlia routing table with prefix-split buckets
//! - [`message`] - KRPC queries, responses, errors and their wire form
//! - [`factory`] - Transaction ids and the pending-query registry
//! - [`token`] - Rotating announce-token secrets
//! - [`engine`] - The serialized engine loop and its public handle
//! - [`config`] - Tunables and bootstrap nodes

pub mod bencode;
pub mod config;
pub mod engine;
pub mod error;
pub mod factory;
pub mod message;
pub mod node;
pub mod routing;
pub mod task;
pub mod token;

pub use bencode::{decode, encode, BencodeError, Value};
pub use config::{DhtConfig, BOOTSTRAP_NODES};
pub use engine::{DhtEngine, DhtHandle};
pub use error::DhtError;
pub use message::{
    ErrorBody, Incoming, IncomingEvent, InfoHash, Message, Query, QueryKind, RawResponse,
    Response, TransactionId,
};
pub use node::{Distance, Node, NodeId, NodeState};
pub use routing::{Prefix, RoutingTable};
pub use token::TokenManager;
