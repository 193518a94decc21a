//! Meshcast Core
//!
//! A small peer-to-peer node runtime: fixed-layout signed frames, a
//! capacity-bounded peer set and per-connection read/write tasks.

pub mod config;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod handler;
pub mod identity;
pub mod listener;
pub mod node;
pub mod peer;
pub mod protocol;

pub use config::NodeConfig;
pub use encoding::Body;
pub use error::{NetError, PeerError, ProtocolError, Violation};
pub use handler::{handle, HandlerConfig, HandlerExit};
pub use identity::{Identity, KeyTable};
pub use listener::{connect, keepalive, listen, serve_all, Listener, NetContext};
pub use node::{Connection, Node, NodeStatus, PeerRegistry};
pub use peer::Peer;
pub use protocol::{Header, Message, Signature};
