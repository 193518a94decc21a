// =============================================================================
// MESHCAST CORE — listener.rs
// =============================================================================
//
// Connection sources for a node:
//
//   Listener   — accepts inbound TCP, re-polling the stop signal between
//                short accept deadlines
//   serve_all  — one listener per address; stops the node once none is left
//   connect    — dials a remote node and runs it through the same admission
//   keepalive  — periodic ping broadcast so remotes see us as active
//
// Every admitted connection gets its own handler task; listener failures go
// to the shared error channel.
// =============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::constants::{ACCEPT_POLL, CONNECT_TIMEOUT};
use crate::error::NetError;
use crate::handler::{handle, HandlerConfig};
use crate::node::{Connection, Node};
use crate::peer::Peer;
use crate::protocol::Message;

/// Channels and tunables shared by every listener and handler of a node.
#[derive(Clone)]
pub struct NetContext {
    pub stop: CancellationToken,
    pub deliver: mpsc::Sender<Message>,
    pub errors: mpsc::Sender<NetError>,
    pub handler: HandlerConfig,
    pub accept_poll: Duration,
}

impl NetContext {
    pub fn new(
        stop: CancellationToken,
        deliver: mpsc::Sender<Message>,
        errors: mpsc::Sender<NetError>,
    ) -> Self {
        NetContext {
            stop,
            deliver,
            errors,
            handler: HandlerConfig::default(),
            accept_poll: ACCEPT_POLL,
        }
    }

    async fn report(&self, err: NetError) {
        log::error!("{}", err);
        let _ = self.errors.send(err).await;
    }
}

// -----------------------------------------------------------------------------
// Listener
// -----------------------------------------------------------------------------

pub struct Listener {
    inner: TcpListener,
    addr: SocketAddr,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| NetError::Bind { addr, source })?;
        let addr = inner.local_addr()?;
        Ok(Listener { inner, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accepts until the stop signal is set or accept fails.
    pub async fn serve(self, node: Arc<Node>, ctx: NetContext) {
        log::info!("[{}] Listening on {}", node.id(), self.addr);

        loop {
            if ctx.stop.is_cancelled() {
                break;
            }

            let (stream, remote) = match timeout(ctx.accept_poll, self.inner.accept()).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    ctx.report(NetError::Io(e)).await;
                    break;
                }
                Ok(Ok(accepted)) => accepted,
            };

            log::info!("[{}] Incoming connection from {}", node.id(), remote);
            match node.add_peer(stream).await {
                Ok(conn) => spawn_handler(&node, conn, &ctx),
                Err(e) => log::warn!("[{}] Could not admit {}: {}", node.id(), remote, e),
            }
        }

        log::info!("[{}] Listener on {} stopped", node.id(), self.addr);
    }
}

/// Binds `addr` and serves it; a bind failure is reported on the error channel.
pub async fn listen(node: Arc<Node>, addr: SocketAddr, ctx: NetContext) {
    match Listener::bind(addr).await {
        Ok(listener) => listener.serve(node, ctx).await,
        Err(e) => ctx.report(e).await,
    }
}

/// Runs one listener per address and returns once all of them have ended.
/// Sets the stop signal if the last one goes down while the node is still
/// running. An empty address list returns at once and leaves the signal alone.
pub async fn serve_all(node: Arc<Node>, addrs: Vec<SocketAddr>, ctx: NetContext) {
    if addrs.is_empty() {
        return;
    }

    let mut listeners = JoinSet::new();
    for addr in addrs {
        listeners.spawn(listen(Arc::clone(&node), addr, ctx.clone()));
    }
    while let Some(res) = listeners.join_next().await {
        if let Err(e) = res {
            log::error!("[{}] Listener task failed: {}", node.id(), e);
        }
        log::debug!("[{}] {} listener(s) still running", node.id(), listeners.len());
    }

    if !ctx.stop.is_cancelled() {
        log::error!("[{}] No listener left, stopping node", node.id());
        ctx.stop.cancel();
    }
}

// -----------------------------------------------------------------------------
// Outbound
// -----------------------------------------------------------------------------

/// Dials `addr`, admits the connection and starts its handler.
pub async fn connect(node: &Arc<Node>, addr: &str, ctx: &NetContext) -> Result<Arc<Peer>, NetError> {
    log::info!("[{}] Connecting to {}...", node.id(), addr);
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| NetError::ConnectTimeout(addr.to_string()))??;

    let conn = node.add_peer(stream).await?;
    let peer = Arc::clone(&conn.peer);
    spawn_handler(node, conn, ctx);
    log::info!("[{}] Connected to {}", node.id(), peer.key());
    Ok(peer)
}

pub fn spawn_handler(node: &Arc<Node>, conn: Connection, ctx: &NetContext) {
    tokio::spawn(handle(
        node.id(),
        conn,
        Arc::clone(node),
        ctx.stop.clone(),
        ctx.deliver.clone(),
        ctx.handler,
    ));
}

/// Broadcasts a ping every `every` until the stop signal is set.
pub async fn keepalive(node: Arc<Node>, every: Duration, stop: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let sent = node.broadcast(&Message::ping()).await;
                log::debug!("[{}] Ping sent to {} peers", node.id(), sent);
            }
        }
    }
}
