// =============================================================================
// MESHCAST CORE — node.rs
// =============================================================================
//
// The local node: identity, signing key, identity table and the peer set.
//
//   Node          — capacity-bounded admission, broadcast, drain accounting
//   PeerRegistry  — what a connection handler may ask of its node
//   NodeStatus    — snapshot for logs / operators
//
// Admission policy, all under the peer-set lock:
//   1) same endpoint key already present → close the old peer, replace it
//   2) set full → evict the peer with the oldest activity timestamp
//      (ties broken by lowest endpoint key)
//   3) insert the new peer
//
// The drain counter always equals the size of the peer set, so it can
// never go negative no matter how many teardown paths run.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use p256::ecdsa::{SigningKey, VerifyingKey};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Mutex};

use crate::constants::OUTBOUND_QUEUE;
use crate::error::{NetError, PeerError, ProtocolError};
use crate::identity::{Identity, KeyTable};
use crate::peer::{BoxReader, BoxWriter, Peer};
use crate::protocol::Message;

// -----------------------------------------------------------------------------
// PeerRegistry
// -----------------------------------------------------------------------------

/// Capabilities a connection handler needs from the node that owns its peer.
pub trait PeerRegistry: Send + Sync + 'static {
    /// Removes `peer` from the peer set if it is still the tracked instance.
    fn drop_peer(&self, peer: &Arc<Peer>) -> impl Future<Output = ()> + Send;

    fn lookup_key(&self, id: &Identity) -> Option<VerifyingKey>;
}

/// A freshly admitted peer plus the read half of its connection.
pub struct Connection {
    pub peer: Arc<Peer>,
    pub reader: BoxReader,
}

// -----------------------------------------------------------------------------
// Node
// -----------------------------------------------------------------------------

pub struct Node {
    id: Identity,
    key: SigningKey,
    max_peers: usize,
    outbound_queue: usize,
    identities: KeyTable,
    peers: Mutex<HashMap<String, Arc<Peer>>>,
    active: watch::Sender<usize>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Node {
    pub fn new(
        id: Identity,
        key: SigningKey,
        max_peers: usize,
        identities: KeyTable,
    ) -> Result<Self, NetError> {
        if max_peers < 1 {
            return Err(NetError::InvalidConfig(
                "node must allow at least one peer".into(),
            ));
        }
        let (active, _) = watch::channel(0);
        Ok(Node {
            id,
            key,
            max_peers,
            outbound_queue: OUTBOUND_QUEUE,
            identities,
            peers: Mutex::new(HashMap::new()),
            active,
            started_at: Utc::now(),
            started: Instant::now(),
        })
    }

    /// Pending outbound messages per peer before `broadcast` waits.
    pub fn with_outbound_queue(mut self, queue: usize) -> Self {
        self.outbound_queue = queue.max(1);
        self
    }

    pub fn id(&self) -> Identity {
        self.id
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Admits a TCP connection keyed by its remote address.
    pub async fn add_peer(&self, stream: TcpStream) -> Result<Connection, NetError> {
        let key = stream.peer_addr()?.to_string();
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(self.admit_parts(key, Box::new(reader), Box::new(writer)).await)
    }

    /// Admits any byte stream under an explicit endpoint key.
    pub async fn admit<S>(&self, key: impl Into<String>, stream: S) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.admit_parts(key.into(), Box::new(reader), Box::new(writer)).await
    }

    async fn admit_parts(&self, key: String, reader: BoxReader, writer: BoxWriter) -> Connection {
        let peer = Peer::spawn(key.clone(), writer, self.outbound_queue);

        let mut peers = self.peers.lock().await;
        if let Some(old) = peers.get(&key) {
            log::info!("[{}] Peer {} reconnected, replacing old connection", self.id, key);
            close_quietly(old);
        } else if peers.len() >= self.max_peers {
            if let Some(oldest) = oldest_peer(&peers) {
                log::info!(
                    "[{}] Peer set full ({}), evicting idle peer {}",
                    self.id,
                    self.max_peers,
                    oldest
                );
                if let Some(evicted) = peers.remove(&oldest) {
                    close_quietly(&evicted);
                }
            }
        }
        peers.insert(key, Arc::clone(&peer));
        self.active.send_replace(peers.len());

        Connection { peer, reader }
    }

    pub fn lookup_key(&self, id: &Identity) -> Option<VerifyingKey> {
        self.identities.get(id)
    }

    pub async fn drop_peer(&self, peer: &Arc<Peer>) {
        let mut peers = self.peers.lock().await;
        match peers.get(peer.key()) {
            Some(tracked) if tracked.same_as(peer) => {
                peers.remove(peer.key());
                self.active.send_replace(peers.len());
                log::debug!("[{}] Dropped peer {}", self.id, peer.key());
            }
            _ => log::debug!("[{}] Peer {} already gone from peer set", self.id, peer.key()),
        }
    }

    /// Queues `msg` on every tracked peer. Holds the peer-set lock for the
    /// whole pass, so one slow peer delays the ones after it. Returns the
    /// number of peers that accepted the message.
    pub async fn broadcast(&self, msg: &Message) -> usize {
        let peers = self.peers.lock().await;
        let mut sent = 0;
        for peer in peers.values() {
            match peer.enqueue(msg.clone()).await {
                Ok(()) => sent += 1,
                Err(e) => log::debug!("[{}] Broadcast skipped {}: {}", self.id, peer.key(), e),
            }
        }
        sent
    }

    /// Signs `body` as this node.
    pub fn sign(&self, encoding: i8, body: impl Into<bytes::Bytes>) -> Result<Message, ProtocolError> {
        Message::signed(self.id, encoding, body, &self.key)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key().clone()
    }

    /// Number of admitted peers not yet dropped.
    pub fn active_peers(&self) -> usize {
        *self.active.borrow()
    }

    /// Completes `done` once no peers remain.
    pub fn await_drain(&self, done: oneshot::Sender<()>) {
        let mut rx = self.active.subscribe();
        tokio::spawn(async move {
            let _ = rx.wait_for(|n| *n == 0).await;
            let _ = done.send(());
        });
    }

    /// Waits until no peers remain.
    pub async fn drained(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Closes every tracked peer; their handlers then drop them.
    pub async fn close_all(&self) {
        let peers = self.peers.lock().await;
        for peer in peers.values() {
            close_quietly(peer);
        }
    }

    pub async fn status(&self) -> NodeStatus {
        let peers = self.peers.lock().await;
        let mut peer_keys: Vec<String> = peers.keys().cloned().collect();
        peer_keys.sort();
        NodeStatus {
            node_id: self.id,
            max_peers: self.max_peers,
            active_peers: peers.len(),
            peer_keys,
            known_identities: self.identities.len(),
            started_at: self.started_at,
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

impl PeerRegistry for Node {
    async fn drop_peer(&self, peer: &Arc<Peer>) {
        Node::drop_peer(self, peer).await
    }

    fn lookup_key(&self, id: &Identity) -> Option<VerifyingKey> {
        Node::lookup_key(self, id)
    }
}

fn oldest_peer(peers: &HashMap<String, Arc<Peer>>) -> Option<String> {
    peers
        .values()
        .min_by(|a, b| {
            a.last_recv()
                .cmp(&b.last_recv())
                .then_with(|| a.key().cmp(b.key()))
        })
        .map(|p| p.key().to_string())
}

fn close_quietly(peer: &Peer) {
    if let Err(PeerError::AlreadyClosed) = peer.close() {
        log::debug!("Peer {} was already closed", peer.key());
    }
}

// -----------------------------------------------------------------------------
// NodeStatus
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node_id: Identity,
    pub max_peers: usize,
    pub active_peers: usize,
    pub peer_keys: Vec<String>,
    pub known_identities: usize,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "═══════════════════════════════════════\n\
             MESHCAST NODE STATUS\n\
             ═══════════════════════════════════════\n\
             ID:       {}\n\
             Peers:    {}/{} {:?}\n\
             Keys:     {} identities\n\
             Started:  {}\n\
             Uptime:   {}s\n\
             ═══════════════════════════════════════",
            self.node_id,
            self.active_peers,
            self.max_peers,
            self.peer_keys,
            self.known_identities,
            self.started_at.to_rfc3339(),
            self.uptime_seconds
        )
    }
}
