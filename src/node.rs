use crate::error::DhtError;
use rand::Rng as _;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
// tokio's Instant so paused-clock tests can advance node ages.
use tokio::time::Instant;

/// A 160-bit Kademlia identifier.
///
/// Node ids and info hashes share this space; closeness between them is
/// measured by [`NodeId::distance`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    pub const BITS: usize = 160;

    pub const MIN: NodeId = NodeId([0u8; 20]);

    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        if bytes.len() != 20 {
            return Err(DhtError::InvalidNodeId);
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// XOR distance to another id. Zero iff the ids are equal, and
    /// commutative by construction.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut dist = [0u8; 20];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        Distance(dist)
    }

    /// Returns bit `index` counting from the most significant bit.
    pub fn bit(&self, index: usize) -> bool {
        debug_assert!(index < Self::BITS);
        self.0[index / 8] & (0x80 >> (index % 8)) != 0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// XOR distance between two ids, ordered as a 160-bit big-endian integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance(pub [u8; 20]);

impl Distance {
    pub const ZERO: Distance = Distance([0u8; 20]);
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Liveness state of a remote node.
///
/// Nodes start `Unknown`, become `Good` on any successful contact, and
/// `Bad` after enough consecutive failures. `Bad` is not terminal: a
/// later successful contact recovers the node to `Good`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unknown,
    Good,
    Bad,
}

/// A remote DHT participant.
///
/// Nodes live only inside the routing table; everything else refers to
/// them by id and reaches their state through table methods.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub state: NodeState,
    pub last_seen: Instant,
    pub failures: u8,
}

impl Node {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            state: NodeState::Unknown,
            last_seen: Instant::now(),
            failures: 0,
        }
    }

    /// Records a successful contact: resets the failure counter and
    /// returns the node to `Good` from any state.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.failures = 0;
        self.state = NodeState::Good;
    }

    /// Records a query timeout. The node turns `Bad` only when the
    /// counter reaches `max_failures`; `last_seen` is left alone.
    pub fn fail(&mut self, max_failures: u8) {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= max_failures {
            self.state = NodeState::Bad;
        }
    }

    pub fn is_bad(&self) -> bool {
        self.state == NodeState::Bad
    }

    /// Parses a 26-byte compact entry: 20-byte id, IPv4, big-endian port.
    pub fn from_compact(data: &[u8]) -> Option<Self> {
        if data.len() != 26 {
            return None;
        }

        let id = NodeId::from_bytes(&data[..20]).ok()?;
        let ip = Ipv4Addr::new(data[20], data[21], data[22], data[23]);
        let port = u16::from_be_bytes([data[24], data[25]]);

        Some(Self::new(id, SocketAddr::new(IpAddr::V4(ip), port)))
    }

    /// Compact encoding; `None` for IPv6 endpoints, which the compact
    /// format cannot represent.
    pub fn to_compact(&self) -> Option<[u8; 26]> {
        let SocketAddr::V4(v4) = self.addr else {
            return None;
        };

        let mut compact = [0u8; 26];
        compact[..20].copy_from_slice(&self.id.0);
        compact[20..24].copy_from_slice(&v4.ip().octets());
        compact[24..26].copy_from_slice(&v4.port().to_be_bytes());
        Some(compact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: u8, port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)), port)
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(NodeId::generate().0, NodeId::generate().0);
    }

    #[test]
    fn from_bytes_requires_twenty() {
        assert!(NodeId::from_bytes(&[1u8; 20]).is_ok());
        assert!(NodeId::from_bytes(&[1u8; 19]).is_err());
        assert!(NodeId::from_bytes(&[1u8; 21]).is_err());
    }

    #[test]
    fn distance_is_zero_to_self_and_commutative() {
        let a = NodeId::generate();
        let b = NodeId::generate();

        assert_eq!(a.distance(&a), Distance::ZERO);
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn distance_orders_big_endian() {
        let zero = NodeId([0u8; 20]);

        let mut near = [0u8; 20];
        near[19] = 1;
        let mut far = [0u8; 20];
        far[0] = 1;

        assert!(zero.distance(&NodeId(near)) < zero.distance(&NodeId(far)));
    }

    #[test]
    fn bit_indexing() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0x80;
        bytes[1] = 0x01;
        let id = NodeId(bytes);

        assert!(id.bit(0));
        assert!(!id.bit(1));
        assert!(id.bit(15));
    }

    #[test]
    fn node_state_machine() {
        let mut node = Node::new(NodeId::generate(), addr(1, 6881));
        assert_eq!(node.state, NodeState::Unknown);

        // One isolated timeout is not enough to condemn the node.
        node.fail(4);
        assert_eq!(node.state, NodeState::Unknown);
        assert_eq!(node.failures, 1);

        node.touch();
        assert_eq!(node.state, NodeState::Good);
        assert_eq!(node.failures, 0);

        for _ in 0..4 {
            node.fail(4);
        }
        assert_eq!(node.state, NodeState::Bad);
        assert_eq!(node.failures, 4);

        // Bad is not terminal.
        node.touch();
        assert_eq!(node.state, NodeState::Good);
    }

    #[test]
    fn compact_roundtrip() {
        let node = Node::new(NodeId([7u8; 20]), addr(9, 51413));
        let compact = node.to_compact().unwrap();

        let parsed = Node::from_compact(&compact).unwrap();
        assert_eq!(parsed.id, node.id);
        assert_eq!(parsed.addr, node.addr);
    }

    #[test]
    fn compact_rejects_wrong_length() {
        assert!(Node::from_compact(&[0u8; 25]).is_none());
        assert!(Node::from_compact(&[0u8; 27]).is_none());
    }
}
