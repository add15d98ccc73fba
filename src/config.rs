use std::time::Duration;

/// Well-known entry points into the public mainline DHT.
pub const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
];

/// Engine tunables. The defaults are the standard Kademlia/BEP-5 values;
/// tests shrink the timing knobs instead of sleeping.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Bucket capacity (the Kademlia `k`).
    pub k: usize,
    /// Consecutive timeouts before a node is considered `Bad`.
    pub max_failures: u8,
    /// Total send attempts per query, initial send included.
    pub max_retries: u32,
    /// How long to wait for a response before each retry.
    pub query_timeout: Duration,
    /// Buckets untouched for longer than this get a refresh probe.
    pub bucket_refresh: Duration,
    /// Announce-token secret rotation period; a token outlives exactly
    /// one rotation.
    pub token_rotation: Duration,
    /// How long an announced peer stays listed without re-announcing.
    pub peer_announce_lifetime: Duration,
    /// Cap on stored peers per info hash.
    pub max_peers_per_info_hash: usize,
    /// Cap on simultaneously in-flight outgoing queries.
    pub max_pending_queries: usize,
    /// Nodes pinged when bootstrapping an empty table.
    pub bootstrap_nodes: Vec<String>,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: 8,
            max_failures: 4,
            max_retries: 4,
            query_timeout: Duration::from_secs(15),
            bucket_refresh: Duration::from_secs(15 * 60),
            token_rotation: Duration::from_secs(5 * 60),
            peer_announce_lifetime: Duration::from_secs(30 * 60),
            max_peers_per_info_hash: 1000,
            max_pending_queries: 100,
            bootstrap_nodes: BOOTSTRAP_NODES.iter().map(|s| s.to_string()).collect(),
        }
    }
}
