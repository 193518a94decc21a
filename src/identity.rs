// =============================================================================
// MESHCAST CORE — identity.rs
// =============================================================================
//
// Node identities and the identity → public key table.
//
//   Identity  — 128-bit UUID naming a node, carried as `sender` on the wire
//   KeyTable  — shared, lock-protected map used to verify inbound frames
//   hex helpers for P-256 key material in config files
// =============================================================================

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use p256::ecdsa::{SigningKey, VerifyingKey};
use uuid::Uuid;

use crate::constants::IDENTITY_LEN;
use crate::error::NetError;

// -----------------------------------------------------------------------------
// Identity
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identity(Uuid);

impl Identity {
    pub fn random() -> Self {
        Identity(Uuid::new_v4())
    }

    pub const fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
        Identity(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        self.0.as_bytes()
    }
}

impl From<Uuid> for Identity {
    fn from(id: Uuid) -> Self {
        Identity(id)
    }
}

impl FromStr for Identity {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Identity)
            .map_err(|e| NetError::InvalidConfig(format!("bad identity {:?}: {}", s, e)))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

// -----------------------------------------------------------------------------
// KeyTable
// -----------------------------------------------------------------------------

/// Identity → public key table.
///
/// Cloning shares the same table, so the embedding process can rotate keys
/// while nodes keep reading it.
#[derive(Clone, Default)]
pub struct KeyTable {
    inner: Arc<RwLock<HashMap<Identity, VerifyingKey>>>,
}

impl KeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: Identity, key: VerifyingKey) -> Option<VerifyingKey> {
        self.write().insert(id, key)
    }

    pub fn remove(&self, id: &Identity) -> Option<VerifyingKey> {
        self.write().remove(id)
    }

    pub fn get(&self, id: &Identity) -> Option<VerifyingKey> {
        self.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every write is a single map operation; poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Identity, VerifyingKey>> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Identity, VerifyingKey>> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl FromIterator<(Identity, VerifyingKey)> for KeyTable {
    fn from_iter<I: IntoIterator<Item = (Identity, VerifyingKey)>>(iter: I) -> Self {
        KeyTable {
            inner: Arc::new(RwLock::new(iter.into_iter().collect())),
        }
    }
}

impl fmt::Debug for KeyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyTable").field("entries", &self.len()).finish()
    }
}

// -----------------------------------------------------------------------------
// Key material helpers
// -----------------------------------------------------------------------------

/// Parses a hex-encoded 32-byte P-256 scalar.
pub fn signing_key_from_hex(s: &str) -> Result<SigningKey, NetError> {
    let raw = hex::decode(s.trim()).map_err(|e| NetError::Key(format!("private key: {}", e)))?;
    SigningKey::from_slice(&raw).map_err(|e| NetError::Key(format!("private key: {}", e)))
}

/// Parses a hex-encoded SEC1 point (compressed or uncompressed).
pub fn verifying_key_from_hex(s: &str) -> Result<VerifyingKey, NetError> {
    let raw = hex::decode(s.trim()).map_err(|e| NetError::Key(format!("public key: {}", e)))?;
    VerifyingKey::from_sec1_bytes(&raw).map_err(|e| NetError::Key(format!("public key: {}", e)))
}

pub fn signing_key_to_hex(key: &SigningKey) -> String {
    hex::encode(key.to_bytes())
}

/// Uncompressed SEC1 encoding.
pub fn verifying_key_to_hex(key: &VerifyingKey) -> String {
    hex::encode(key.to_encoded_point(false).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_identity_parse_and_display() {
        let id: Identity = "99375318-11c4-4a77-ba42-f7c08ca7b9d0".parse().unwrap();
        assert_eq!(id.to_string(), "99375318-11c4-4a77-ba42-f7c08ca7b9d0");
        assert_eq!(id.as_bytes()[0], 0x99);
        assert!("not-a-uuid".parse::<Identity>().is_err());
    }

    #[test]
    fn test_identity_bytes_roundtrip() {
        let id = Identity::random();
        assert_eq!(Identity::from_bytes(*id.as_bytes()), id);
    }

    #[test]
    fn test_key_table_shared_between_clones() {
        let table = KeyTable::new();
        let view = table.clone();
        let id = Identity::random();
        let key = SigningKey::random(&mut OsRng);

        assert!(view.get(&id).is_none());
        table.insert(id, key.verifying_key().clone());
        assert_eq!(view.get(&id).as_ref(), Some(key.verifying_key()));
        assert_eq!(view.len(), 1);

        table.remove(&id);
        assert!(view.is_empty());
    }

    #[test]
    fn test_key_hex_roundtrip() {
        let key = SigningKey::random(&mut OsRng);
        let parsed = signing_key_from_hex(&signing_key_to_hex(&key)).unwrap();
        assert_eq!(parsed.to_bytes(), key.to_bytes());

        let public = verifying_key_from_hex(&verifying_key_to_hex(key.verifying_key())).unwrap();
        assert_eq!(&public, key.verifying_key());
    }

    #[test]
    fn test_bad_key_hex_rejected() {
        assert!(matches!(signing_key_from_hex("zz"), Err(NetError::Key(_))));
        assert!(matches!(verifying_key_from_hex("0400"), Err(NetError::Key(_))));
    }
}
