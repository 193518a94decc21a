// =============================================================================
// MESHCAST CORE — peer.rs
// =============================================================================
//
// One live connection to a remote node.
//
//   Peer        — endpoint key, activity timestamp, bounded outbound queue
//   write_loop  — dedicated task draining the queue onto the socket
//
// The read half of the connection is handed to the connection handler;
// closing the peer cancels both sides.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PeerError;
use crate::protocol::Message;

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

pub struct Peer {
    id: u64,
    key: String,
    last_recv: Mutex<Instant>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Peer {
    /// Creates the peer and starts its writer task.
    pub fn spawn(key: String, writer: BoxWriter, queue: usize) -> Arc<Peer> {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let peer = Arc::new(Peer {
            id: NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed),
            key,
            last_recv: Mutex::new(Instant::now()),
            outbound: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(write_loop(Arc::clone(&peer), writer, rx));
        peer
    }

    /// Remote endpoint; unique within a node's peer set.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn last_recv(&self) -> Instant {
        *self.last_recv.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Marks the peer as active now.
    pub fn touch(&self) {
        *self.last_recv.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn set_last_recv(&self, at: Instant) {
        *self.last_recv.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }

    /// Hands `msg` to the writer task. Waits while the queue is full; fails
    /// once the peer is closed.
    pub async fn enqueue(&self, msg: Message) -> Result<(), PeerError> {
        let tx = self
            .outbound
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(PeerError::Closed)?;

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(PeerError::Closed),
            res = tx.send(msg) => res.map_err(|_| PeerError::Closed),
        }
    }

    /// Closes the queue and the connection. A second call reports
    /// `AlreadyClosed` and changes nothing.
    pub fn close(&self) -> Result<(), PeerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(PeerError::AlreadyClosed);
        }
        self.outbound.lock().unwrap_or_else(|p| p.into_inner()).take();
        self.shutdown.cancel();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the peer has been closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// True when both handles name the same connection, not just the same key.
    pub fn same_as(&self, other: &Peer) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Writer task
// -----------------------------------------------------------------------------

async fn write_loop(peer: Arc<Peer>, mut writer: BoxWriter, mut rx: mpsc::Receiver<Message>) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = peer.shutdown.cancelled() => break,
            msg = rx.recv() => msg,
        };
        let Some(msg) = msg else { break };

        let res = tokio::select! {
            biased;
            _ = peer.shutdown.cancelled() => break,
            res = write_frame(&mut writer, &msg) => res,
        };
        if let Err(e) = res {
            log::warn!("Error writing to {}: {}", peer.key, e);
            let _ = peer.close();
            break;
        }
    }

    let _ = writer.shutdown().await;
    log::debug!("Writer stopped for peer {}", peer.key);
}

async fn write_frame(writer: &mut BoxWriter, msg: &Message) -> std::io::Result<()> {
    // write_all keeps going across short writes
    writer.write_all(&msg.header.to_bytes()).await?;
    if !msg.body.is_empty() {
        writer.write_all(&msg.body).await?;
    }
    writer.flush().await
}
