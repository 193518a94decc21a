//! Error types for Meshcast Core.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A single header rule broken by a data frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("invalid magic byte: {0:#04x}")]
    BadMagic(u8),
    #[error("invalid version: {0}")]
    BadVersion(i8),
    #[error("invalid encoding: {0}")]
    UnknownEncoding(i8),
    #[error("non-positive length: {0}")]
    NonPositiveLength(i32),
}

/// Frame-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not enough bytes for a full header
    #[error("malformed header: expected {expected} bytes, got {actual}")]
    MalformedHeader { expected: usize, actual: usize },

    /// R or S is zero or out of range for P-256
    #[error("signature component out of range")]
    BadSignatureComponent,

    /// Signing backend rejected the digest
    #[error("signing failed: {0}")]
    Signing(String),

    /// Body does not fit the i32 length field
    #[error("body of {0} bytes does not fit the length field")]
    BodyTooLong(usize),

    /// Body does not decode under its encoding tag
    #[error("cannot decode body with encoding {encoding}: {reason}")]
    Decode { encoding: i8, reason: String },
}

/// Peer lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("peer already closed")]
    AlreadyClosed,
    #[error("peer closed")]
    Closed,
}

/// Node, listener and connection errors
#[derive(Debug, Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("invalid key material: {0}")]
    Key(String),
}
