//! Protocol and runtime constants for Meshcast Core
//!
//! Wire-level values are fixed by the frame layout and shared by every
//! node on the network. Runtime defaults can be overridden from config.

use std::time::Duration;

/// Network name shown in the banner
pub const NETWORK_NAME: &str = "Meshcast";

/// Crate version
pub const VERSION: &str = "0.1.0-alpha";

/// Project tagline
pub const TAGLINE: &str = "Signed broadcast between directly connected peers";

// ═══════════════════════════════════════════════════════════════
// Wire format
// ═══════════════════════════════════════════════════════════════

/// Sentinel byte opening every frame
pub const MAGIC: u8 = b'g';

/// Version carried by data frames
pub const PROTOCOL_VERSION: i8 = 1;

/// Version carried by ping frames
pub const PING_VERSION: i8 = 0;

/// Size of one signature component (R or S)
pub const SIG_COMPONENT_LEN: usize = 32;

/// Size of a sender identity
pub const IDENTITY_LEN: usize = 16;

/// magic + version + hops + R + S + sender + encoding + length
pub const HEADER_LEN: usize = 1 + 1 + 1 + 2 * SIG_COMPONENT_LEN + IDENTITY_LEN + 1 + 4;

/// Bytes covered by the digest ahead of the body: sender + encoding + length
pub const SIGNED_PREFIX_LEN: usize = IDENTITY_LEN + 1 + 4;

// ═══════════════════════════════════════════════════════════════
// Runtime defaults
// ═══════════════════════════════════════════════════════════════

/// Pending outbound messages per peer before enqueue blocks
pub const OUTBOUND_QUEUE: usize = 3;

/// Default peer-set capacity
pub const DEFAULT_MAX_PEERS: usize = 100;

/// Read deadline while waiting for a header; only used to re-poll the stop signal
pub const HEADER_POLL: Duration = Duration::from_secs(1);

/// Time a client gets to deliver a body once its header arrived
pub const BODY_GRACE: Duration = Duration::from_secs(5);

/// Accept deadline; only used to re-poll the stop signal
pub const ACCEPT_POLL: Duration = Duration::from_secs(1);

/// Dial timeout for outbound connections
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest body accepted from a peer
pub const MAX_BODY_LEN: usize = 4 * 1024 * 1024;

/// Capacity of the delivery channel handed to the application
pub const DELIVERY_BUFFER: usize = 64;

// ═══════════════════════════════════════════════════════════════
// Display functions
// ═══════════════════════════════════════════════════════════════

/// Print the startup banner
pub fn print_banner() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                   MESHCAST CORE                            ║");
    println!("║                                                            ║");
    println!("║  P-256 signed frames • direct-neighbour broadcast          ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("  {} v{}", NETWORK_NAME, VERSION);
    println!("  {}", TAGLINE);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_len_matches_wire_table() {
        assert_eq!(HEADER_LEN, 88);
        assert_eq!(SIGNED_PREFIX_LEN, 21);
    }

    #[test]
    fn test_ping_and_data_versions_differ() {
        assert_ne!(PING_VERSION, PROTOCOL_VERSION);
    }
}
