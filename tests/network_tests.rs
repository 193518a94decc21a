//! End-to-end tests over real TCP sockets.
//!
//! Each test wires up nodes with a listener, a delivery channel and the
//! short poll intervals below, then drives traffic between them.

use std::sync::Arc;
use std::time::Duration;

use p256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use meshcast_core::encoding::ENCODING_TEXT;
use meshcast_core::{connect, Header, Identity, KeyTable, Listener, Message, NetContext, NetError, Node};

struct TestNode {
    node: Arc<Node>,
    ctx: NetContext,
    delivered: mpsc::Receiver<Message>,
    _errors: mpsc::Receiver<NetError>,
}

fn test_node(max_peers: usize, identities: KeyTable) -> TestNode {
    test_node_with(
        Node::new(Identity::random(), SigningKey::random(&mut OsRng), max_peers, identities)
            .expect("valid node"),
    )
}

fn test_node_with(node: Node) -> TestNode {
    let (dtx, delivered) = mpsc::channel(16);
    let (etx, errors) = mpsc::channel(16);
    let mut ctx = NetContext::new(CancellationToken::new(), dtx, etx);
    ctx.accept_poll = Duration::from_millis(50);
    ctx.handler.header_poll = Duration::from_millis(50);
    ctx.handler.body_timeout = Duration::from_millis(500);
    TestNode {
        node: Arc::new(node),
        ctx,
        delivered,
        _errors: errors,
    }
}

async fn start_listener(t: &TestNode) -> std::net::SocketAddr {
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr();
    tokio::spawn(listener.serve(Arc::clone(&t.node), t.ctx.clone()));
    addr
}

async fn wait_for_peers(node: &Node, n: usize) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while node.active_peers() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {} peers, have {}", n, node.active_peers()));
}

async fn nothing_delivered(rx: &mut mpsc::Receiver<Message>) -> bool {
    tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.is_err()
}

// ============================================================================
// Broadcast between two nodes
// ============================================================================

#[tokio::test]
async fn test_broadcast_reaches_direct_neighbour_once() {
    let author = Identity::random();
    let author_key = SigningKey::random(&mut OsRng);
    let table = KeyTable::new();
    table.insert(author, author_key.verifying_key().clone());

    let mut a = test_node(4, table);
    let mut b = test_node(4, KeyTable::new());
    let b_addr = start_listener(&b).await;

    connect(&a.node, &b_addr.to_string(), &a.ctx).await.unwrap();
    wait_for_peers(&b.node, 1).await;

    let msg = Message::signed(author, ENCODING_TEXT, &b"hello mesh"[..], &author_key).unwrap();
    assert_eq!(b.node.broadcast(&msg).await, 1);

    let got = tokio::time::timeout(Duration::from_secs(2), a.delivered.recv())
        .await
        .expect("message should arrive")
        .expect("delivery channel open");
    assert_eq!(got.header.sender, author);
    assert_eq!(&got.body[..], b"hello mesh");

    assert!(nothing_delivered(&mut a.delivered).await, "delivered twice");
    assert!(nothing_delivered(&mut b.delivered).await, "messages are not relayed back");
    assert_eq!(a.node.active_peers(), 1);

    a.ctx.stop.cancel();
    b.ctx.stop.cancel();
    wait_for_peers(&a.node, 0).await;
    wait_for_peers(&b.node, 0).await;
}

#[tokio::test]
async fn test_nodes_holding_each_others_keys_exchange_once() {
    let a_key = SigningKey::random(&mut OsRng);
    let b_key = SigningKey::random(&mut OsRng);
    let (a_id, b_id) = (Identity::random(), Identity::random());
    let a_table = KeyTable::new();
    a_table.insert(b_id, b_key.verifying_key().clone());
    let b_table = KeyTable::new();
    b_table.insert(a_id, a_key.verifying_key().clone());

    let mut a = test_node_with(Node::new(a_id, a_key, 4, a_table).unwrap());
    let mut b = test_node_with(Node::new(b_id, b_key, 4, b_table).unwrap());
    let b_addr = start_listener(&b).await;

    connect(&a.node, &b_addr.to_string(), &a.ctx).await.unwrap();
    wait_for_peers(&b.node, 1).await;

    let msg = b.node.sign(ENCODING_TEXT, &b"from B"[..]).unwrap();
    assert_eq!(b.node.broadcast(&msg).await, 1);

    let got = tokio::time::timeout(Duration::from_secs(2), a.delivered.recv())
        .await
        .expect("message should arrive")
        .expect("delivery channel open");
    assert_eq!(got.header.sender, b.node.id());
    assert_eq!(&got.body[..], b"from B");

    assert!(nothing_delivered(&mut a.delivered).await, "delivered twice");
    assert!(nothing_delivered(&mut b.delivered).await, "broadcast came back to its sender");

    a.ctx.stop.cancel();
    b.ctx.stop.cancel();
    wait_for_peers(&a.node, 0).await;
    wait_for_peers(&b.node, 0).await;
}

#[tokio::test]
async fn test_unknown_sender_keeps_connection() {
    let author = Identity::random();
    let author_key = SigningKey::random(&mut OsRng);
    let table = KeyTable::new();
    table.insert(author, author_key.verifying_key().clone());

    let mut a = test_node(4, table);
    let b = test_node(4, KeyTable::new());
    let b_addr = start_listener(&b).await;
    connect(&a.node, &b_addr.to_string(), &a.ctx).await.unwrap();
    wait_for_peers(&b.node, 1).await;

    let stranger_key = SigningKey::random(&mut OsRng);
    let stranger = Message::signed(Identity::random(), ENCODING_TEXT, &b"who?"[..], &stranger_key).unwrap();
    let known = Message::signed(author, ENCODING_TEXT, &b"me"[..], &author_key).unwrap();
    b.node.broadcast(&stranger).await;
    b.node.broadcast(&known).await;

    let got = tokio::time::timeout(Duration::from_secs(2), a.delivered.recv())
        .await
        .expect("known message should arrive")
        .unwrap();
    assert_eq!(&got.body[..], b"me");
    assert_eq!(a.node.active_peers(), 1);

    a.ctx.stop.cancel();
    b.ctx.stop.cancel();
}

#[tokio::test]
async fn test_forged_signature_drops_connection() {
    let author = Identity::random();
    let author_key = SigningKey::random(&mut OsRng);
    let table = KeyTable::new();
    table.insert(author, author_key.verifying_key().clone());

    let mut a = test_node(4, table);
    let b = test_node(4, KeyTable::new());
    let b_addr = start_listener(&b).await;
    connect(&a.node, &b_addr.to_string(), &a.ctx).await.unwrap();
    wait_for_peers(&b.node, 1).await;

    let forger = SigningKey::random(&mut OsRng);
    let forged = Message::signed(author, ENCODING_TEXT, &b"trust me"[..], &forger).unwrap();
    b.node.broadcast(&forged).await;

    wait_for_peers(&a.node, 0).await;
    wait_for_peers(&b.node, 0).await;
    assert!(nothing_delivered(&mut a.delivered).await);
}

// ============================================================================
// Misbehaving clients
// ============================================================================

#[tokio::test]
async fn test_disconnect_mid_body_releases_peer() {
    let mut b = test_node(4, KeyTable::new());
    let b_addr = start_listener(&b).await;

    let mut raw = TcpStream::connect(b_addr).await.unwrap();
    wait_for_peers(&b.node, 1).await;

    let header = Header::data(Identity::random(), ENCODING_TEXT, 10);
    raw.write_all(&header.to_bytes()).await.unwrap();
    raw.write_all(b"abc").await.unwrap();
    drop(raw);

    wait_for_peers(&b.node, 0).await;
    assert!(nothing_delivered(&mut b.delivered).await);
    b.ctx.stop.cancel();
}

#[tokio::test]
async fn test_ping_keeps_peer_and_delivers_nothing() {
    let mut b = test_node(4, KeyTable::new());
    let b_addr = start_listener(&b).await;

    let mut raw = TcpStream::connect(b_addr).await.unwrap();
    wait_for_peers(&b.node, 1).await;
    raw.write_all(&Message::ping().encode()).await.unwrap();

    assert!(nothing_delivered(&mut b.delivered).await);
    assert_eq!(b.node.active_peers(), 1);
    b.ctx.stop.cancel();
    wait_for_peers(&b.node, 0).await;
}

#[tokio::test]
async fn test_capacity_evicts_idle_peer() {
    let b = test_node(1, KeyTable::new());
    let b_addr = start_listener(&b).await;

    let _first = TcpStream::connect(b_addr).await.unwrap();
    wait_for_peers(&b.node, 1).await;
    let first_key = b.node.status().await.peer_keys[0].clone();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = TcpStream::connect(b_addr).await.unwrap();
    let second_key = second.local_addr().unwrap().to_string();

    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let keys = b.node.status().await.peer_keys;
            if keys == vec![second_key.clone()] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second connection should replace the first");
    assert_ne!(first_key, second_key);
    assert_eq!(b.node.active_peers(), 1);
    b.ctx.stop.cancel();
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_stop_signal_drains_all_peers() {
    let b = test_node(8, KeyTable::new());
    let b_addr = start_listener(&b).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(TcpStream::connect(b_addr).await.unwrap());
    }
    wait_for_peers(&b.node, 3).await;

    let (done_tx, done_rx) = oneshot::channel();
    b.node.await_drain(done_tx);
    b.ctx.stop.cancel();

    tokio::time::timeout(Duration::from_secs(3), done_rx)
        .await
        .expect("drain should complete")
        .unwrap();
    assert_eq!(b.node.active_peers(), 0);
}
