//! The DHT engine and its serialized message loop.
//!
//! All mutable state — routing table, token secrets, pending-transaction
//! registry, peer registrations — is owned by [`DhtEngine`] and touched
//! only from inside [`DhtEngine::run`], which drains a single command
//! channel. The UDP reader and writer tasks never mutate engine state:
//! the reader converts datagrams into commands, the writer drains the
//! outbound queue. Timers are sleep tasks that post a command back to
//! the same loop, so a cancelled or superseded timer is a no-op by the
//! time it is handled. No locks anywhere.

use crate::config::DhtConfig;
use crate::error::DhtError;
use crate::factory::MessageFactory;
use crate::message::{
    ErrorBody, Incoming, IncomingEvent, InfoHash, Message, Query, RawResponse, Response,
    TransactionId,
};
use crate::node::{Node, NodeId};
use crate::routing::{Prefix, RoutingTable};
use crate::task::SendQueryTask;
use crate::token::TokenManager;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_QUEUE_DEPTH: usize = 256;
const OUTBOUND_QUEUE_DEPTH: usize = 256;
const MAX_DATAGRAM: usize = 65535;

/// Concurrent probes per iterative lookup wave.
const ALPHA: usize = 3;
const MAX_LOOKUP_ITERATIONS: usize = 10;
const ENOUGH_PEERS: usize = 50;

/// Work items executed one at a time on the engine loop.
#[derive(Debug)]
pub(crate) enum Command {
    Datagram {
        data: Bytes,
        from: SocketAddr,
    },
    SendQuery {
        addr: SocketAddr,
        node_id: Option<NodeId>,
        query: Query,
        done: oneshot::Sender<Result<Response, DhtError>>,
    },
    QueryTimeout {
        transaction_id: TransactionId,
        attempt: u32,
    },
    AddNode {
        id: NodeId,
        addr: SocketAddr,
    },
    Closest {
        target: NodeId,
        count: usize,
        reply: oneshot::Sender<Vec<Node>>,
    },
    GetNode {
        id: NodeId,
        reply: oneshot::Sender<Option<Node>>,
    },
    NodeCount {
        reply: oneshot::Sender<usize>,
    },
    StaleBuckets {
        reply: oneshot::Sender<Vec<Prefix>>,
    },
    Shutdown,
}

struct AnnouncedPeer {
    addr: SocketAddr,
    announced_at: Instant,
}

/// Peers announced to us, per info hash, with per-entry expiry and a cap
/// against announce flooding.
struct PeerStore {
    lifetime: Duration,
    max_per_hash: usize,
    peers: HashMap<InfoHash, Vec<AnnouncedPeer>>,
}

impl PeerStore {
    fn new(lifetime: Duration, max_per_hash: usize) -> Self {
        Self {
            lifetime,
            max_per_hash,
            peers: HashMap::new(),
        }
    }

    fn add(&mut self, info_hash: InfoHash, addr: SocketAddr) {
        let peers = self.peers.entry(info_hash).or_default();
        let now = Instant::now();

        peers.retain(|p| now.duration_since(p.announced_at) < self.lifetime && p.addr != addr);

        if peers.len() < self.max_per_hash {
            peers.push(AnnouncedPeer {
                addr,
                announced_at: now,
            });
        }
    }

    fn get(&mut self, info_hash: &InfoHash) -> Vec<SocketAddr> {
        let now = Instant::now();
        match self.peers.get_mut(info_hash) {
            Some(peers) => {
                peers.retain(|p| now.duration_since(p.announced_at) < self.lifetime);
                peers.iter().map(|p| p.addr).collect()
            }
            None => Vec::new(),
        }
    }
}

/// The engine: exclusive owner of all DHT state.
pub struct DhtEngine {
    our_id: NodeId,
    config: DhtConfig,
    table: RoutingTable,
    tokens: TokenManager,
    factory: MessageFactory,
    peers: PeerStore,
    outbound: mpsc::Sender<(Bytes, SocketAddr)>,
    /// Clone of our own command sender, handed to timer tasks.
    commands: mpsc::Sender<Command>,
}

impl DhtEngine {
    pub(crate) fn new(
        our_id: NodeId,
        config: DhtConfig,
        outbound: mpsc::Sender<(Bytes, SocketAddr)>,
        commands: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            our_id,
            table: RoutingTable::new(our_id, config.k, config.max_failures),
            tokens: TokenManager::new(),
            factory: MessageFactory::new(config.max_pending_queries),
            peers: PeerStore::new(config.peer_announce_lifetime, config.max_peers_per_info_hash),
            outbound,
            commands,
            config,
        }
    }

    /// The message loop. Commands execute strictly one at a time in
    /// arrival order; the two maintenance timers are just additional
    /// sources of serialized work.
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut refresh = interval(self.config.bucket_refresh);
        let mut rotation = interval(self.config.token_rotation);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        rotation.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Both intervals yield an immediate first tick; consume them.
        refresh.tick().await;
        rotation.tick().await;

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                _ = refresh.tick() => self.refresh_stale_buckets().await,
                _ = rotation.tick() => {
                    self.tokens.rotate();
                    debug!("announce token secret rotated");
                }
            }
        }

        debug!("engine loop stopped, failing outstanding queries");
        for task in self.factory.drain() {
            task.complete(Err(DhtError::ShuttingDown));
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Datagram { data, from } => self.handle_datagram(&data, from).await,
            Command::SendQuery {
                addr,
                node_id,
                query,
                done,
            } => self.start_query(addr, node_id, query, done).await,
            Command::QueryTimeout {
                transaction_id,
                attempt,
            } => self.handle_timeout(transaction_id, attempt).await,
            Command::AddNode { id, addr } => self.table.add(Node::new(id, addr)),
            Command::Closest {
                target,
                count,
                reply,
            } => {
                let _ = reply.send(self.table.closest(&target, count));
            }
            Command::GetNode { id, reply } => {
                let _ = reply.send(self.table.find(&id).cloned());
            }
            Command::NodeCount { reply } => {
                let _ = reply.send(self.table.node_count());
            }
            Command::StaleBuckets { reply } => {
                let _ = reply.send(self.table.stale_buckets(self.config.bucket_refresh));
            }
            // Handled by the loop before dispatch.
            Command::Shutdown => {}
        }
    }

    // === Outgoing queries ===

    async fn start_query(
        &mut self,
        addr: SocketAddr,
        node_id: Option<NodeId>,
        query: Query,
        done: oneshot::Sender<Result<Response, DhtError>>,
    ) {
        let kind = query.kind();
        let tid = self.factory.next_transaction_id();

        let payload = match Message::query(tid.clone(), self.our_id, query).encode() {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                let _ = done.send(Err(e));
                return;
            }
        };

        let task = SendQueryTask::new(
            kind,
            addr,
            node_id,
            payload.clone(),
            self.config.max_retries,
            done,
        );

        match self.factory.register(tid.clone(), task) {
            Ok(()) => {
                self.send(payload, addr).await;
                self.arm_timer(tid, 1);
            }
            Err((task, err)) => task.complete(Err(err)),
        }
    }

    fn arm_timer(&self, transaction_id: TransactionId, attempt: u32) {
        let commands = self.commands.clone();
        let timeout = self.config.query_timeout;

        tokio::spawn(async move {
            sleep(timeout).await;
            let _ = commands
                .send(Command::QueryTimeout {
                    transaction_id,
                    attempt,
                })
                .await;
        });
    }

    async fn handle_timeout(&mut self, tid: TransactionId, attempt: u32) {
        // The registration may be gone (a response won), or re-armed for
        // a later attempt (a resend already happened); either way this
        // timer is stale and does nothing.
        let Some(task) = self.factory.get_mut(&tid) else {
            return;
        };
        if task.attempt != attempt {
            return;
        }

        let node_id = task.node_id;
        let exhausted = task.exhausted();
        let next = if exhausted { 0 } else { task.next_attempt() };
        let payload = task.payload.clone();
        let addr = task.addr;

        // Every timed-out attempt counts against the node.
        if let Some(id) = node_id {
            self.table.mark_failed(&id);
        }

        if exhausted {
            if let Some(task) = self.factory.unregister(&tid) {
                debug!(%addr, attempts = attempt, "query timed out");
                task.complete(Err(DhtError::Timeout));
            }
        } else {
            self.send(payload, addr).await;
            self.arm_timer(tid, next);
        }
    }

    // === Incoming datagrams ===

    async fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) {
        let incoming = match Incoming::decode(data) {
            Ok(incoming) => incoming,
            Err(decode_err) => {
                debug!(%from, error = %decode_err.error, "undecodable datagram");

                // Answer with a KRPC error when the transaction id
                // survived parsing; otherwise drop silently.
                if let Some(tid) = decode_err.transaction_id {
                    let body = match &decode_err.error {
                        DhtError::UnsupportedQuery(name) => ErrorBody::method_unknown(name),
                        _ => ErrorBody::protocol("malformed message"),
                    };
                    self.reply(Message::error(tid, body), from).await;
                }
                return;
            }
        };

        match incoming.event {
            IncomingEvent::Query { sender, query } => {
                self.handle_query(incoming.transaction_id, from, sender, query)
                    .await
            }
            IncomingEvent::Response(raw) => {
                self.settle(incoming.transaction_id, from, Ok(raw));
            }
            IncomingEvent::Error(body) => {
                self.settle(incoming.transaction_id, from, Err(body));
            }
        }
    }

    /// Resolves an in-flight query with a response or a remote error.
    /// Unknown transaction ids — duplicates, stragglers arriving after
    /// the final timeout — are dropped here.
    fn settle(
        &mut self,
        tid: TransactionId,
        from: SocketAddr,
        outcome: Result<RawResponse, ErrorBody>,
    ) {
        let Some(task) = self.factory.unregister(&tid) else {
            debug!(%from, "response for unknown transaction, dropping");
            return;
        };

        match outcome {
            Ok(raw) => {
                // Any valid response is evidence of liveness, and the
                // nodes it carries are fresh discoveries.
                self.table.add(Node::new(raw.id, from));
                self.table.mark_seen(&raw.id);

                if let Some(nodes) = &raw.nodes {
                    for node in nodes {
                        self.table.add(node.clone());
                    }
                }

                let response = MessageFactory::decode_response(task.kind, raw);
                task.complete(Ok(response));
            }
            Err(body) => {
                debug!(%from, code = body.code, message = %body.message, "remote error");
                task.complete(Err(DhtError::Remote {
                    code: body.code,
                    message: body.message,
                }));
            }
        }
    }

    async fn handle_query(
        &mut self,
        tid: TransactionId,
        from: SocketAddr,
        sender: NodeId,
        query: Query,
    ) {
        // Receiving a valid query is itself evidence of liveness.
        self.table.add(Node::new(sender, from));
        self.table.mark_seen(&sender);

        let reply = match query {
            Query::Ping => Message::response(tid, Response::Ping { id: self.our_id }),
            Query::FindNode { target } => {
                let nodes = self.table.closest(&target, self.config.k);
                Message::response(
                    tid,
                    Response::FindNode {
                        id: self.our_id,
                        nodes,
                    },
                )
            }
            Query::GetPeers { info_hash } => {
                let token = self.tokens.issue(&from);
                let stored = self.peers.get(&info_hash);

                // Known peers win; otherwise fall back to the closest
                // nodes so the asker can keep walking.
                let (peers, nodes) = if stored.is_empty() {
                    (None, Some(self.table.closest(&NodeId(info_hash), self.config.k)))
                } else {
                    (Some(stored), None)
                };

                Message::response(
                    tid,
                    Response::GetPeers {
                        id: self.our_id,
                        token,
                        peers,
                        nodes,
                    },
                )
            }
            Query::AnnouncePeer {
                info_hash,
                port,
                token,
                implied_port,
            } => {
                if self.tokens.verify(&from, &token) {
                    let peer_port = if implied_port { from.port() } else { port };
                    self.peers.add(info_hash, SocketAddr::new(from.ip(), peer_port));
                    Message::response(tid, Response::AnnouncePeer { id: self.our_id })
                } else {
                    debug!(%from, "announce_peer with invalid token");
                    Message::error(tid, ErrorBody::invalid_token())
                }
            }
        };

        self.reply(reply, from).await;
    }

    // === Maintenance ===

    /// Probes every member of each bucket that has gone unrefreshed,
    /// using a random target inside the bucket's range so the responses
    /// both prove liveness and surface new neighbors.
    async fn refresh_stale_buckets(&mut self) {
        let stale = self.table.stale_buckets(self.config.bucket_refresh);
        if stale.is_empty() {
            return;
        }

        debug!(buckets = stale.len(), "refreshing stale buckets");

        for prefix in stale {
            let target = prefix.random_id();
            for node in self.table.bucket_nodes(&prefix) {
                // Fire-and-forget: the settle path records the outcome.
                let (done, _) = oneshot::channel();
                self.start_query(node.addr, Some(node.id), Query::FindNode { target }, done)
                    .await;
            }
        }
    }

    // === Plumbing ===

    async fn send(&self, data: Bytes, addr: SocketAddr) {
        if self.outbound.send((data, addr)).await.is_err() {
            warn!(%addr, "outbound queue closed, dropping datagram");
        }
    }

    async fn reply(&self, msg: Message, to: SocketAddr) {
        match msg.encode() {
            Ok(data) => self.send(Bytes::from(data), to).await,
            Err(e) => warn!(error = %e, "failed to encode reply"),
        }
    }
}

/// Clonable front door to a running engine.
///
/// Every method enqueues a command onto the engine's serialized loop and,
/// where applicable, awaits a one-shot completion delivered back from it.
#[derive(Debug, Clone)]
pub struct DhtHandle {
    our_id: NodeId,
    port: u16,
    config: Arc<DhtConfig>,
    commands: mpsc::Sender<Command>,
}

impl DhtHandle {
    /// Binds a UDP socket and spawns the engine plus its reader and
    /// writer tasks.
    pub async fn bind(port: u16, config: DhtConfig) -> Result<Self, DhtError> {
        let socket = UdpSocket::bind(format!("0.0.0.0:{}", port)).await?;
        let local_addr = socket.local_addr()?;
        let our_id = NodeId::generate();

        info!(id = %our_id, addr = %local_addr, "dht engine starting");

        let socket = Arc::new(socket);
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (outbound, mut outbound_rx) =
            mpsc::channel::<(Bytes, SocketAddr)>(OUTBOUND_QUEUE_DEPTH);

        let engine = DhtEngine::new(our_id, config.clone(), outbound, commands.clone());
        tokio::spawn(engine.run(command_rx));

        let writer = Arc::clone(&socket);
        tokio::spawn(async move {
            while let Some((data, addr)) = outbound_rx.recv().await {
                if let Err(e) = writer.send_to(&data, addr).await {
                    debug!(%addr, error = %e, "udp send failed");
                }
            }
        });

        let reader_commands = commands.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, from)) => {
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        let cmd = Command::Datagram { data, from };
                        if reader_commands.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "udp receive failed"),
                }
            }
        });

        Ok(Self {
            our_id,
            port: local_addr.port(),
            config: Arc::new(config),
            commands,
        })
    }

    /// Spawns an engine without a socket; the caller plays the network
    /// by feeding [`DhtHandle::on_datagram`] and draining the returned
    /// outbound queue.
    #[cfg(test)]
    pub(crate) fn spawn_detached(
        our_id: NodeId,
        config: DhtConfig,
    ) -> (Self, mpsc::Receiver<(Bytes, SocketAddr)>) {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let engine = DhtEngine::new(our_id, config.clone(), outbound, commands.clone());
        tokio::spawn(engine.run(command_rx));

        let handle = Self {
            our_id,
            port: 0,
            config: Arc::new(config),
            commands,
        };
        (handle, outbound_rx)
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    async fn command(&self, cmd: Command) -> Result<(), DhtError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| DhtError::ShuttingDown)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DhtError> {
        let (reply, rx) = oneshot::channel();
        self.command(make(reply)).await?;
        rx.await.map_err(|_| DhtError::ShuttingDown)
    }

    /// Feeds a raw datagram into the engine, as the UDP reader task
    /// does. Public so an external listener can drive the engine.
    pub async fn on_datagram(&self, data: Bytes, from: SocketAddr) -> Result<(), DhtError> {
        self.command(Command::Datagram { data, from }).await
    }

    /// Sends one query and awaits its response, retries and timeout
    /// included. Pass the node id when the peer is (or should be)
    /// tracked in the routing table so timeouts count against it.
    pub async fn query(
        &self,
        addr: SocketAddr,
        node_id: Option<NodeId>,
        query: Query,
    ) -> Result<Response, DhtError> {
        let (done, rx) = oneshot::channel();
        self.command(Command::SendQuery {
            addr,
            node_id,
            query,
            done,
        })
        .await?;
        rx.await.map_err(|_| DhtError::ShuttingDown)?
    }

    /// Liveness check of an arbitrary endpoint.
    pub async fn ping(&self, addr: SocketAddr) -> Result<Response, DhtError> {
        self.query(addr, None, Query::Ping).await
    }

    pub async fn add_node(&self, id: NodeId, addr: SocketAddr) -> Result<(), DhtError> {
        self.command(Command::AddNode { id, addr }).await
    }

    /// Snapshot of a tracked node, if any.
    pub async fn node(&self, id: NodeId) -> Result<Option<Node>, DhtError> {
        self.request(|reply| Command::GetNode { id, reply }).await
    }

    pub async fn closest_nodes(&self, target: NodeId, count: usize) -> Result<Vec<Node>, DhtError> {
        self.request(|reply| Command::Closest {
            target,
            count,
            reply,
        })
        .await
    }

    pub async fn node_count(&self) -> Result<usize, DhtError> {
        self.request(|reply| Command::NodeCount { reply }).await
    }

    /// Prefixes of buckets currently due for a refresh probe.
    pub async fn stale_buckets(&self) -> Result<Vec<Prefix>, DhtError> {
        self.request(|reply| Command::StaleBuckets { reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), DhtError> {
        self.command(Command::Shutdown).await
    }

    /// Pings the configured bootstrap nodes, then walks toward our own
    /// id to populate the routing table.
    pub async fn bootstrap(&self) -> Result<(), DhtError> {
        info!("starting bootstrap");

        for addr_str in &self.config.bootstrap_nodes {
            match tokio::net::lookup_host(addr_str.as_str()).await {
                Ok(mut addrs) => {
                    if let Some(addr) = addrs.next() {
                        if let Err(e) = self.ping(addr).await {
                            debug!(%addr, error = %e, "bootstrap ping failed");
                        }
                    }
                }
                Err(e) => warn!(node = %addr_str, error = %e, "bootstrap resolve failed"),
            }
        }

        self.find_node(self.our_id).await?;

        let nodes = self.node_count().await?;
        info!(nodes, "bootstrap complete");
        Ok(())
    }

    /// Iterative node lookup: queries waves of the closest known nodes
    /// until no closer ones appear.
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<Node>, DhtError> {
        let mut found = Vec::new();
        let mut queried: HashSet<NodeId> = HashSet::new();
        let mut candidates = self.closest_nodes(target, self.config.k).await?;

        for _ in 0..MAX_LOOKUP_ITERATIONS {
            let wave = next_wave(&mut candidates, &mut queried, &target);
            if wave.is_empty() {
                break;
            }

            let mut probes = tokio::task::JoinSet::new();
            for node in wave {
                let handle = self.clone();
                probes.spawn(async move {
                    let result = handle
                        .query(node.addr, Some(node.id), Query::FindNode { target })
                        .await;
                    (node, result)
                });
            }

            while let Some(joined) = probes.join_next().await {
                let Ok((node, result)) = joined else { continue };
                match result {
                    Ok(Response::FindNode { nodes, .. }) => {
                        for n in nodes {
                            if !queried.contains(&n.id) {
                                candidates.push(n.clone());
                            }
                            found.push(n);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!(node = %node.id, error = %e, "find_node probe failed"),
                }
            }
        }

        Ok(found)
    }

    /// Iterative peer lookup for `info_hash`.
    pub async fn get_peers(&self, info_hash: InfoHash) -> Result<Vec<SocketAddr>, DhtError> {
        Ok(self.lookup_peers(info_hash).await?.peers)
    }

    /// Announces that we are downloading `info_hash` on `port`: looks up
    /// the closest responding nodes, then announces to them with the
    /// tokens they issued. Returns how many announces were accepted.
    pub async fn announce(&self, info_hash: InfoHash, port: u16) -> Result<usize, DhtError> {
        let lookup = self.lookup_peers(info_hash).await?;
        let target = NodeId(info_hash);

        let mut responders = lookup.responders;
        responders.sort_by_key(|(node, _)| (node.id.distance(&target), node.id));

        let mut accepted = 0;
        for (node, token) in responders.into_iter().take(self.config.k) {
            let announce = Query::AnnouncePeer {
                info_hash,
                port,
                token,
                implied_port: false,
            };
            match self.query(node.addr, Some(node.id), announce).await {
                Ok(_) => accepted += 1,
                Err(e) => debug!(node = %node.id, error = %e, "announce failed"),
            }
        }

        Ok(accepted)
    }

    async fn lookup_peers(&self, info_hash: InfoHash) -> Result<PeerLookup, DhtError> {
        let target = NodeId(info_hash);
        let mut lookup = PeerLookup::default();
        let mut queried: HashSet<NodeId> = HashSet::new();
        let mut candidates = self.closest_nodes(target, self.config.k).await?;

        for _ in 0..MAX_LOOKUP_ITERATIONS {
            let wave = next_wave(&mut candidates, &mut queried, &target);
            if wave.is_empty() {
                break;
            }

            let mut probes = tokio::task::JoinSet::new();
            for node in wave {
                let handle = self.clone();
                probes.spawn(async move {
                    let result = handle
                        .query(node.addr, Some(node.id), Query::GetPeers { info_hash })
                        .await;
                    (node, result)
                });
            }

            while let Some(joined) = probes.join_next().await {
                let Ok((node, result)) = joined else { continue };
                match result {
                    Ok(Response::GetPeers {
                        token,
                        peers,
                        nodes,
                        ..
                    }) => {
                        lookup.responders.push((node, token));

                        if let Some(peers) = peers {
                            lookup.peers.extend(peers);
                        }
                        if let Some(nodes) = nodes {
                            for n in nodes {
                                if !queried.contains(&n.id) {
                                    candidates.push(n);
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!(node = %node.id, error = %e, "get_peers probe failed"),
                }
            }

            if lookup.peers.len() >= ENOUGH_PEERS {
                break;
            }
        }

        lookup.peers.sort();
        lookup.peers.dedup();
        Ok(lookup)
    }
}

#[derive(Default)]
struct PeerLookup {
    peers: Vec<SocketAddr>,
    responders: Vec<(Node, Bytes)>,
}

/// Picks the next `ALPHA` unqueried candidates closest to `target`,
/// marking them queried.
fn next_wave(
    candidates: &mut Vec<Node>,
    queried: &mut HashSet<NodeId>,
    target: &NodeId,
) -> Vec<Node> {
    candidates.sort_by_key(|n| (n.id.distance(target), n.id));
    candidates.dedup_by_key(|n| n.id);

    let wave: Vec<Node> = candidates
        .iter()
        .filter(|n| !queried.contains(&n.id))
        .take(ALPHA)
        .cloned()
        .collect();

    for node in &wave {
        queried.insert(node.id);
    }
    wave
}
