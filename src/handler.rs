// =============================================================================
// MESHCAST CORE — handler.rs
// =============================================================================
//
// Per-connection read loop.
//
//   poll stop ─▶ read header (short deadline, re-poll on timeout)
//        ▲            │
//        │            ├─ ping            → touch, loop
//        │            ├─ invalid header  → fatal
//        │            ▼
//        │       read body (grace deadline)  → timeout / short read fatal
//        │            │
//        │            ├─ unknown sender  → drop message, loop
//        │            ├─ bad signature   → fatal
//        │            ├─ sender == self  → drop message, loop
//        └────────────┴─ deliver to application
//
// Every exit runs the same cleanup: close the peer, drop it from the node.
// Header bytes read before a poll timeout are kept, so a header trickling in
// across several polls is still parsed correctly.
// =============================================================================

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::constants::{BODY_GRACE, HEADER_LEN, HEADER_POLL, MAX_BODY_LEN};
use crate::error::Violation;
use crate::identity::Identity;
use crate::node::{Connection, PeerRegistry};
use crate::peer::{BoxReader, Peer};
use crate::protocol::{Header, Message};

#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
    /// Header read deadline; only bounds how often the stop signal is polled.
    pub header_poll: Duration,
    /// Time a sender gets to deliver a body after its header.
    pub body_timeout: Duration,
    pub max_body_len: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig {
            header_poll: HEADER_POLL,
            body_timeout: BODY_GRACE,
            max_body_len: MAX_BODY_LEN,
        }
    }
}

/// Why a connection handler returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerExit {
    /// Stop signal observed
    Stopped,
    /// Peer closed elsewhere (evicted, replaced, writer failure)
    PeerClosed,
    /// Remote closed the connection between frames
    Eof,
    ReadError(io::ErrorKind),
    Invalid(Vec<Violation>),
    TooLarge(usize),
    BodyTimeout,
    ShortBody(io::ErrorKind),
    BadSignature(Identity),
    /// Application dropped its delivery receiver
    DeliveryClosed,
}

/// Runs the read loop for one admitted connection until it terminates, then
/// closes the peer and removes it from `registry`.
pub async fn handle<R: PeerRegistry>(
    local_id: Identity,
    conn: Connection,
    registry: Arc<R>,
    stop: CancellationToken,
    deliver: mpsc::Sender<Message>,
    cfg: HandlerConfig,
) -> HandlerExit {
    let Connection { peer, mut reader } = conn;

    let exit = read_loop(local_id, &peer, &mut reader, registry.as_ref(), &stop, &deliver, cfg).await;

    match &exit {
        HandlerExit::Stopped | HandlerExit::PeerClosed | HandlerExit::Eof => {
            log::info!("[{}] Connection {} ended: {:?}", local_id, peer.key(), exit)
        }
        _ => log::warn!("[{}] Connection {} terminated: {:?}", local_id, peer.key(), exit),
    }

    let _ = peer.close();
    registry.drop_peer(&peer).await;
    exit
}

async fn read_loop<R: PeerRegistry>(
    local_id: Identity,
    peer: &Arc<Peer>,
    reader: &mut BoxReader,
    registry: &R,
    stop: &CancellationToken,
    deliver: &mpsc::Sender<Message>,
    cfg: HandlerConfig,
) -> HandlerExit {
    let mut hdr = [0u8; HEADER_LEN];
    let mut filled = 0;

    loop {
        if stop.is_cancelled() {
            return HandlerExit::Stopped;
        }

        let read = tokio::select! {
            biased;
            _ = peer.closed() => return HandlerExit::PeerClosed,
            r = timeout(cfg.header_poll, reader.read(&mut hdr[filled..])) => r,
        };
        match read {
            Err(_) => continue,
            Ok(Err(e)) => return HandlerExit::ReadError(e.kind()),
            Ok(Ok(0)) if filled == 0 => return HandlerExit::Eof,
            Ok(Ok(0)) => return HandlerExit::ReadError(io::ErrorKind::UnexpectedEof),
            Ok(Ok(n)) => filled += n,
        }
        if filled < HEADER_LEN {
            continue;
        }
        filled = 0;

        let header = match Header::decode(&hdr) {
            Ok(h) => h,
            Err(_) => return HandlerExit::ReadError(io::ErrorKind::InvalidData),
        };
        peer.touch();

        if header.is_ping() {
            continue;
        }

        let violations = header.validate();
        if !violations.is_empty() {
            for v in &violations {
                log::warn!("Invalid header from {}: {}", peer.key(), v);
            }
            return HandlerExit::Invalid(violations);
        }

        let len = header.length as usize;
        if len > cfg.max_body_len {
            return HandlerExit::TooLarge(len);
        }

        let mut body = vec![0u8; len];
        let read = tokio::select! {
            biased;
            _ = peer.closed() => return HandlerExit::PeerClosed,
            r = timeout(cfg.body_timeout, reader.read_exact(&mut body)) => r,
        };
        match read {
            Err(_) => return HandlerExit::BodyTimeout,
            Ok(Err(e)) => {
                log::warn!("Error reading body of {} bytes from {}: {}", len, peer.key(), e);
                return HandlerExit::ShortBody(e.kind());
            }
            Ok(Ok(_)) => {}
        }

        // Unknown sender: skip the frame. Bad signature: drop the connection.
        let msg = Message::new(header, body);
        match registry.lookup_key(&header.sender) {
            Some(key) => {
                if !msg.verify(&key) {
                    log::warn!(
                        "Message from {} via {} failed signature verification",
                        header.sender,
                        peer.key()
                    );
                    return HandlerExit::BadSignature(header.sender);
                }
            }
            None => {
                log::info!("Dropping message from {} via {}. Unknown ID.", header.sender, peer.key());
                continue;
            }
        }

        if header.sender == local_id {
            continue;
        }

        tokio::select! {
            biased;
            _ = peer.closed() => return HandlerExit::PeerClosed,
            _ = stop.cancelled() => return HandlerExit::Stopped,
            res = deliver.send(msg) => {
                if res.is_err() {
                    return HandlerExit::DeliveryClosed;
                }
            }
        }
    }
}
