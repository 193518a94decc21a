// =============================================================================
// MESHCAST CORE — main.rs
// =============================================================================
//
//   meshcast-node run <config.json>   — start a node
//   meshcast-node keygen              — print a fresh identity + key pair
//   meshcast-node help
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use p256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use meshcast_core::constants;
use meshcast_core::identity::{signing_key_to_hex, verifying_key_to_hex};
use meshcast_core::listener::{connect, keepalive, serve_all, NetContext};
use meshcast_core::{Identity, Message, NetError, NodeConfig};

/// Upper bound on waiting for handlers after the stop signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match cmd {
        "run" => {
            let Some(path) = args.get(2) else {
                bail!("usage: meshcast-node run <config.json>");
            };
            constants::print_banner();
            run_node(path).await?;
        }
        "keygen" => keygen(),
        _ => print_help(),
    }
    Ok(())
}

fn print_help() {
    println!("Meshcast Core — commands:");
    println!("  run <config.json>  — start a node (env: MESHCAST_LISTEN, MESHCAST_MAX_PEERS, MESHCAST_PEERS)");
    println!("  keygen             — generate a node id and P-256 key pair");
    println!("  help               — this message");
}

fn keygen() {
    let key = SigningKey::random(&mut OsRng);
    println!("node_id:     {}", Identity::random());
    println!("private_key: {}", signing_key_to_hex(&key));
    println!("public_key:  {}", verifying_key_to_hex(key.verifying_key()));
}

// -----------------------------------------------------------------------------
// run
// -----------------------------------------------------------------------------

async fn run_node(path: &str) -> anyhow::Result<()> {
    let cfg = NodeConfig::load(path).with_context(|| format!("loading {}", path))?;
    let node = Arc::new(cfg.build_node()?);

    let stop = CancellationToken::new();
    let (deliver_tx, deliver_rx) = mpsc::channel(cfg.delivery_buffer.max(1));
    let (errors_tx, errors_rx) = mpsc::channel(16);
    let mut ctx = NetContext::new(stop.clone(), deliver_tx, errors_tx);
    ctx.handler = cfg.handler_config();
    ctx.accept_poll = cfg.accept_poll();

    tokio::spawn(log_deliveries(node.id(), deliver_rx));
    tokio::spawn(log_errors(node.id(), errors_rx));

    tokio::spawn(serve_all(Arc::clone(&node), cfg.listen.clone(), ctx.clone()));
    for addr in &cfg.peers {
        if let Err(e) = connect(&node, addr, &ctx).await {
            log::warn!("[{}] Could not reach {}: {}", node.id(), addr, e);
        }
    }
    if let Some(every) = cfg.ping_interval() {
        tokio::spawn(keepalive(Arc::clone(&node), every, stop.clone()));
    }

    log::info!("[{}] Node started, max {} peers", node.id(), node.max_peers());

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for Ctrl-C")?;
            log::info!("[{}] Shutting down...", node.id());
            stop.cancel();
        }
        _ = stop.cancelled() => {
            log::error!("[{}] All listeners are down, shutting down", node.id());
        }
    }

    let (done_tx, done_rx) = oneshot::channel();
    node.await_drain(done_tx);
    if tokio::time::timeout(DRAIN_TIMEOUT, done_rx).await.is_err() {
        log::warn!("[{}] Drain timed out, closing remaining peers", node.id());
        node.close_all().await;
    }

    println!("{}", node.status().await);
    Ok(())
}

async fn log_deliveries(id: Identity, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        match msg.decode_body() {
            Ok(body) => log::info!("[{}] {} says: {}", id, msg.header.sender, body),
            Err(e) => log::warn!("[{}] Undecodable message from {}: {}", id, msg.header.sender, e),
        }
    }
}

async fn log_errors(id: Identity, mut rx: mpsc::Receiver<NetError>) {
    while let Some(err) = rx.recv().await {
        log::error!("[{}] Network error: {}", id, err);
    }
}
