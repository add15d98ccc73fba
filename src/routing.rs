use crate::node::{Node, NodeId, NodeState};
use rand::Rng as _;
use std::time::Duration;
use tokio::time::Instant;

/// A contiguous, half-open slice of the 160-bit id space, identified by
/// the first `bits` bits of `base`. Bits of `base` past the prefix
/// length are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    base: NodeId,
    bits: usize,
}

impl Prefix {
    /// The prefix covering the entire id space.
    pub fn all() -> Self {
        Self {
            base: NodeId::MIN,
            bits: 0,
        }
    }

    pub fn base(&self) -> &NodeId {
        &self.base
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    pub fn covers(&self, id: &NodeId) -> bool {
        let full_bytes = self.bits / 8;
        if self.base.0[..full_bytes] != id.0[..full_bytes] {
            return false;
        }

        let rem = self.bits % 8;
        if rem == 0 {
            return true;
        }

        let mask = !(0xFFu8 >> rem);
        self.base.0[full_bytes] & mask == id.0[full_bytes] & mask
    }

    /// Splits into the two half-ranges one bit longer; `None` once every
    /// bit is fixed.
    pub fn split(self) -> Option<(Prefix, Prefix)> {
        if self.bits >= NodeId::BITS {
            return None;
        }

        let lo = Prefix {
            base: self.base,
            bits: self.bits + 1,
        };

        let mut hi = lo;
        hi.base.0[self.bits / 8] |= 0x80 >> (self.bits % 8);

        Some((lo, hi))
    }

    /// A uniformly random id inside this range, used as the target of
    /// bucket refresh probes.
    pub fn random_id(&self) -> NodeId {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);

        let full_bytes = self.bits / 8;
        id[..full_bytes].copy_from_slice(&self.base.0[..full_bytes]);

        let rem = self.bits % 8;
        if rem != 0 {
            let mask = !(0xFFu8 >> rem);
            id[full_bytes] = (self.base.0[full_bytes] & mask) | (id[full_bytes] & !mask);
        }

        NodeId(id)
    }
}

#[derive(Debug)]
struct Bucket {
    prefix: Prefix,
    nodes: Vec<Node>,
    last_changed: Instant,
}

impl Bucket {
    fn new(prefix: Prefix) -> Self {
        Self {
            prefix,
            nodes: Vec::new(),
            last_changed: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_changed = Instant::now();
    }
}

/// The Kademlia routing table: an ordered sequence of buckets whose
/// prefixes partition the whole id space.
///
/// The table is exclusively owned by the engine and mutated only on its
/// serialized loop, so it needs no interior locking. Nodes exist only
/// here; callers address them by id through the `mark_*` methods rather
/// than holding references across suspension points.
#[derive(Debug)]
pub struct RoutingTable {
    our_id: NodeId,
    k: usize,
    max_failures: u8,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub fn new(our_id: NodeId, k: usize, max_failures: u8) -> Self {
        Self {
            our_id,
            k,
            max_failures,
            buckets: vec![Bucket::new(Prefix::all())],
        }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    fn bucket_index(&self, id: &NodeId) -> usize {
        // Buckets are kept sorted by base, so the covering bucket is the
        // last one whose base is <= id.
        self.buckets.partition_point(|b| b.prefix.base <= *id) - 1
    }

    /// Inserts a node, or refreshes its endpoint if already present.
    ///
    /// A full bucket covering our own id splits; any other full bucket
    /// evicts a `Bad` member if it has one, and otherwise silently
    /// declines. Never errors.
    pub fn add(&mut self, node: Node) {
        if node.id == self.our_id {
            return;
        }

        loop {
            let idx = self.bucket_index(&node.id);
            let bucket = &mut self.buckets[idx];
            debug_assert!(bucket.prefix.covers(&node.id));

            if let Some(existing) = bucket.nodes.iter_mut().find(|n| n.id == node.id) {
                existing.addr = node.addr;
                bucket.touch();
                return;
            }

            if bucket.nodes.len() < self.k {
                bucket.nodes.push(node);
                bucket.touch();
                return;
            }

            if bucket.prefix.covers(&self.our_id) && bucket.prefix.bits() < NodeId::BITS {
                self.split_bucket(idx);
                continue;
            }

            if let Some(pos) = bucket.nodes.iter().position(|n| n.is_bad()) {
                bucket.nodes[pos] = node;
                bucket.touch();
            }
            return;
        }
    }

    fn split_bucket(&mut self, idx: usize) {
        let bucket = self.buckets.remove(idx);
        let (lo_prefix, hi_prefix) = bucket
            .prefix
            .split()
            .expect("split_bucket called on an unsplittable bucket");

        let mut lo = Bucket::new(lo_prefix);
        let mut hi = Bucket::new(hi_prefix);
        lo.last_changed = bucket.last_changed;
        hi.last_changed = bucket.last_changed;

        for node in bucket.nodes {
            if hi_prefix.covers(&node.id) {
                hi.nodes.push(node);
            } else {
                lo.nodes.push(node);
            }
        }

        self.buckets.insert(idx, hi);
        self.buckets.insert(idx, lo);
    }

    pub fn find(&self, id: &NodeId) -> Option<&Node> {
        let idx = self.bucket_index(id);
        self.buckets[idx].nodes.iter().find(|n| &n.id == id)
    }

    /// Records a successful contact with `id`, refreshing both the node
    /// and its bucket's `last_changed`.
    pub fn mark_seen(&mut self, id: &NodeId) {
        let idx = self.bucket_index(id);
        let bucket = &mut self.buckets[idx];

        if let Some(node) = bucket.nodes.iter_mut().find(|n| &n.id == id) {
            node.touch();
            bucket.touch();
        }
    }

    /// Records a query timeout against `id`. The node stays in the table
    /// even when `Bad`; it is only displaced when a full bucket needs
    /// the slot.
    pub fn mark_failed(&mut self, id: &NodeId) {
        let idx = self.bucket_index(id);
        let max_failures = self.max_failures;

        if let Some(node) = self.buckets[idx].nodes.iter_mut().find(|n| &n.id == id) {
            node.fail(max_failures);
        }
    }

    /// Up to `n` non-`Bad` nodes ordered by XOR distance to `target`,
    /// ties broken by lower raw id.
    pub fn closest(&self, target: &NodeId, n: usize) -> Vec<Node> {
        let mut nodes: Vec<&Node> = self
            .buckets
            .iter()
            .flat_map(|b| b.nodes.iter())
            .filter(|node| !node.is_bad())
            .collect();

        nodes.sort_by_key(|node| (node.id.distance(target), node.id));
        nodes.into_iter().take(n).cloned().collect()
    }

    /// Prefixes of buckets untouched for longer than `interval`, due for
    /// a refresh probe.
    pub fn stale_buckets(&self, interval: Duration) -> Vec<Prefix> {
        self.buckets
            .iter()
            .filter(|b| b.last_changed.elapsed() > interval)
            .map(|b| b.prefix)
            .collect()
    }

    /// Current members of the bucket identified by `prefix`.
    pub fn bucket_nodes(&self, prefix: &Prefix) -> Vec<Node> {
        self.buckets
            .iter()
            .find(|b| &b.prefix == prefix)
            .map(|b| b.nodes.clone())
            .unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.buckets.iter().map(|b| b.nodes.len()).sum()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    const K: usize = 8;
    const MAX_FAILURES: u8 = 4;

    fn addr(host: u8, port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)), port)
    }

    fn id(bytes: &[u8]) -> NodeId {
        let mut id = [0u8; 20];
        id[..bytes.len()].copy_from_slice(bytes);
        NodeId(id)
    }

    fn table() -> RoutingTable {
        RoutingTable::new(NodeId::MIN, K, MAX_FAILURES)
    }

    #[test]
    fn prefix_covers_after_split() {
        let (lo, hi) = Prefix::all().split().unwrap();

        assert!(lo.covers(&id(&[0x00])));
        assert!(lo.covers(&id(&[0x7F])));
        assert!(!lo.covers(&id(&[0x80])));

        assert!(hi.covers(&id(&[0x80])));
        assert!(hi.covers(&id(&[0xFF])));
        assert!(!hi.covers(&id(&[0x00])));
    }

    #[test]
    fn prefix_random_id_stays_inside() {
        let (_, hi) = Prefix::all().split().unwrap();
        let (lo, _) = hi.split().unwrap();

        for _ in 0..50 {
            assert!(lo.covers(&lo.random_id()));
        }
    }

    #[test]
    fn add_is_idempotent_per_id() {
        let mut table = table();
        let node_id = id(&[0x80, 1]);

        table.add(Node::new(node_id, addr(1, 6881)));
        table.add(Node::new(node_id, addr(2, 6881)));

        assert_eq!(table.node_count(), 1);
        // The refresh updated the endpoint.
        assert_eq!(table.find(&node_id).unwrap().addr, addr(2, 6881));
    }

    #[test]
    fn own_id_is_never_stored() {
        let mut table = table();
        table.add(Node::new(NodeId::MIN, addr(1, 6881)));
        assert_eq!(table.node_count(), 0);
    }

    #[test]
    fn far_bucket_declines_when_full() {
        let mut table = table();

        // Ids with the leading bit set all share the far half once the
        // root bucket splits away from our (all-zero) id.
        for i in 0..K as u8 + 4 {
            table.add(Node::new(id(&[0x80, i]), addr(i, 6881)));
        }

        assert_eq!(table.node_count(), K);
    }

    #[test]
    fn bucket_covering_own_id_splits() {
        let mut table = table();

        // Nodes near our id keep splitting the covering bucket, so more
        // than K of them fit in the table.
        for i in 1..=K as u8 + 4 {
            table.add(Node::new(id(&[0x00, i]), addr(i, 6881)));
        }
        for i in 0..4u8 {
            table.add(Node::new(id(&[0x80, i]), addr(100 + i, 6881)));
        }

        assert!(table.node_count() > K);
        assert!(table.bucket_count() > 1);
        assert!(table.node_count() <= table.bucket_count() * K);
    }

    #[test]
    fn full_bucket_evicts_bad_member() {
        let mut table = table();

        for i in 0..K as u8 {
            table.add(Node::new(id(&[0x80, i]), addr(i, 6881)));
        }

        let victim = id(&[0x80, 3]);
        for _ in 0..MAX_FAILURES {
            table.mark_failed(&victim);
        }
        assert_eq!(table.find(&victim).unwrap().state, NodeState::Bad);

        let fresh = id(&[0x80, 0xEE]);
        table.add(Node::new(fresh, addr(200, 6881)));

        assert!(table.find(&victim).is_none());
        assert!(table.find(&fresh).is_some());
        assert_eq!(table.node_count(), K);
    }

    #[test]
    fn closest_orders_by_distance_with_id_tiebreak() {
        let mut table = table();

        for i in 1..=20u8 {
            table.add(Node::new(id(&[0x00, 0x00, i]), addr(i, 6881)));
        }

        let target = id(&[0x00, 0x00, 1]);
        let closest = table.closest(&target, K);

        assert_eq!(closest.len(), K);
        assert_eq!(closest[0].id, target);

        for pair in closest.windows(2) {
            let a = pair[0].id.distance(&target);
            let b = pair[1].id.distance(&target);
            assert!((a, pair[0].id) < (b, pair[1].id));
        }
    }

    #[test]
    fn closest_skips_bad_nodes() {
        let mut table = table();
        let bad = id(&[0x80, 1]);

        table.add(Node::new(bad, addr(1, 6881)));
        table.add(Node::new(id(&[0x80, 2]), addr(2, 6881)));

        for _ in 0..MAX_FAILURES {
            table.mark_failed(&bad);
        }

        let closest = table.closest(&bad, K);
        assert!(closest.iter().all(|n| n.id != bad));
    }

    #[test]
    fn mark_seen_refreshes_node_and_bucket() {
        let mut table = table();
        let node_id = id(&[0x80, 1]);
        table.add(Node::new(node_id, addr(1, 6881)));

        for _ in 0..2 {
            table.mark_failed(&node_id);
        }
        table.mark_seen(&node_id);

        let node = table.find(&node_id).unwrap();
        assert_eq!(node.state, NodeState::Good);
        assert_eq!(node.failures, 0);
        assert!(table.stale_buckets(Duration::from_secs(60)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_buckets_reports_untouched_prefixes() {
        let mut table = table();
        let node_id = id(&[0x80, 1]);
        table.add(Node::new(node_id, addr(1, 6881)));

        assert!(table.stale_buckets(Duration::from_secs(60)).is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        let stale = table.stale_buckets(Duration::from_secs(60));
        assert_eq!(stale.len(), 1);
        assert!(stale[0].covers(&node_id));

        table.mark_seen(&node_id);
        assert!(table.stale_buckets(Duration::from_secs(60)).is_empty());
    }
}
