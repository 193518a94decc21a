// =============================================================================
// MESHCAST CORE — protocol.rs
// =============================================================================
//
// Wire format of a frame (big-endian):
//
//   off  size  field
//   ───  ────  ─────────────────────────────────────────────
//     0     1  magic      'g'
//     1     1  version    1 = data, 0 = ping
//     2     1  hops       reserved
//     3    64  signature  R || S, 32 bytes each
//    67    16  sender     identity (UUID)
//    83     1  encoding   body decoder tag
//    84     4  length     i32, body byte count
//    88     …  body
//
// Signing: ECDSA P-256 over SHA-1(sender || encoding || length || body).
// magic, version and hops stay outside the signed envelope.
// =============================================================================

use bytes::{Buf, BufMut, Bytes, BytesMut};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::FieldBytes;
use sha1::{Digest, Sha1};

use crate::constants::{
    HEADER_LEN, IDENTITY_LEN, MAGIC, PING_VERSION, PROTOCOL_VERSION, SIGNED_PREFIX_LEN,
    SIG_COMPONENT_LEN,
};
use crate::encoding::{self, Body, EncodingRegistry};
use crate::error::{ProtocolError, Violation};
use crate::identity::Identity;

/// Length of the digest that gets signed.
pub const DIGEST_LEN: usize = 20;

// -----------------------------------------------------------------------------
// Signature
// -----------------------------------------------------------------------------

/// Fixed-width P-256 signature: two zero-padded big-endian integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signature {
    pub r: [u8; SIG_COMPONENT_LEN],
    pub s: [u8; SIG_COMPONENT_LEN],
}

impl Signature {
    fn from_ecdsa(sig: &p256::ecdsa::Signature) -> Self {
        let (r_bytes, s_bytes) = sig.split_bytes();
        let mut r = [0u8; SIG_COMPONENT_LEN];
        let mut s = [0u8; SIG_COMPONENT_LEN];
        r.copy_from_slice(&r_bytes);
        s.copy_from_slice(&s_bytes);
        Signature { r, s }
    }

    fn to_ecdsa(self) -> Result<p256::ecdsa::Signature, ProtocolError> {
        p256::ecdsa::Signature::from_scalars(
            FieldBytes::clone_from_slice(&self.r),
            FieldBytes::clone_from_slice(&self.s),
        )
        .map_err(|_| ProtocolError::BadSignatureComponent)
    }
}

// -----------------------------------------------------------------------------
// Header
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub version: i8,
    pub hops: i8,
    pub signature: Signature,
    pub sender: Identity,
    pub encoding: i8,
    pub length: i32,
}

impl Header {
    /// Unsigned data header; `signature` is filled in by `sign`.
    pub fn data(sender: Identity, encoding: i8, length: i32) -> Self {
        Header {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            hops: 0,
            signature: Signature::default(),
            sender,
            encoding,
            length,
        }
    }

    pub fn ping() -> Self {
        Header {
            magic: MAGIC,
            version: PING_VERSION,
            hops: 0,
            signature: Signature::default(),
            sender: Identity::default(),
            encoding: 0,
            length: 0,
        }
    }

    /// A ping is recognised by magic, version and hops alone.
    pub fn is_ping(&self) -> bool {
        self.magic == MAGIC && self.version == PING_VERSION && self.hops == 0
    }

    /// Validates against the process-wide encoding registry.
    pub fn validate(&self) -> Vec<Violation> {
        self.validate_with(encoding::registry())
    }

    pub fn validate_with(&self, registry: &EncodingRegistry) -> Vec<Violation> {
        let mut violations = Vec::new();
        if self.magic != MAGIC {
            violations.push(Violation::BadMagic(self.magic));
        }
        if self.version != PROTOCOL_VERSION {
            violations.push(Violation::BadVersion(self.version));
        }
        if !registry.is_known(self.encoding) {
            violations.push(Violation::UnknownEncoding(self.encoding));
        }
        if self.length < 1 {
            violations.push(Violation::NonPositiveLength(self.length));
        }
        violations
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_LEN);
        buf.put_u8(self.magic);
        buf.put_i8(self.version);
        buf.put_i8(self.hops);
        buf.put_slice(&self.signature.r);
        buf.put_slice(&self.signature.s);
        buf.put_slice(self.sender.as_bytes());
        buf.put_i8(self.encoding);
        buf.put_i32(self.length);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Parses the first `HEADER_LEN` bytes of `buf`.
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::MalformedHeader {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }
        let magic = buf.get_u8();
        let version = buf.get_i8();
        let hops = buf.get_i8();
        let mut signature = Signature::default();
        buf.copy_to_slice(&mut signature.r);
        buf.copy_to_slice(&mut signature.s);
        let mut sender = [0u8; IDENTITY_LEN];
        buf.copy_to_slice(&mut sender);
        let encoding = buf.get_i8();
        let length = buf.get_i32();
        Ok(Header {
            magic,
            version,
            hops,
            signature,
            sender: Identity::from_bytes(sender),
            encoding,
            length,
        })
    }
}

// -----------------------------------------------------------------------------
// Free functions over (header, body)
// -----------------------------------------------------------------------------

/// Header bytes followed by the raw body.
pub fn encode(header: &Header, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    header.encode_into(&mut buf);
    buf.put_slice(body);
    buf.freeze()
}

pub fn decode(buf: &[u8]) -> Result<Header, ProtocolError> {
    Header::decode(buf)
}

pub fn validate(header: &Header) -> Vec<Violation> {
    header.validate()
}

/// SHA-1 over sender || encoding || length || body.
pub fn digest(header: &Header, body: &[u8]) -> [u8; DIGEST_LEN] {
    let mut prefix = [0u8; SIGNED_PREFIX_LEN];
    prefix[..IDENTITY_LEN].copy_from_slice(header.sender.as_bytes());
    prefix[IDENTITY_LEN] = header.encoding as u8;
    prefix[IDENTITY_LEN + 1..].copy_from_slice(&header.length.to_be_bytes());

    let mut hasher = Sha1::new();
    hasher.update(prefix);
    hasher.update(body);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

pub fn sign(header: &Header, body: &[u8], key: &SigningKey) -> Result<Signature, ProtocolError> {
    let sig: p256::ecdsa::Signature = key
        .sign_prehash(&digest(header, body))
        .map_err(|e| ProtocolError::Signing(e.to_string()))?;
    Ok(Signature::from_ecdsa(&sig))
}

/// False for a bad or malformed signature; never an error.
pub fn verify(header: &Header, body: &[u8], key: &VerifyingKey) -> bool {
    let Ok(sig) = header.signature.to_ecdsa() else {
        return false;
    };
    key.verify_prehash(&digest(header, body), &sig).is_ok()
}

// -----------------------------------------------------------------------------
// Message
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub body: Bytes,
}

impl Message {
    pub fn new(header: Header, body: impl Into<Bytes>) -> Self {
        Message {
            header,
            body: body.into(),
        }
    }

    /// Version-1 data frame from `sender`, signed with `key`.
    pub fn signed(
        sender: Identity,
        encoding: i8,
        body: impl Into<Bytes>,
        key: &SigningKey,
    ) -> Result<Self, ProtocolError> {
        let body = body.into();
        let length = i32::try_from(body.len()).map_err(|_| ProtocolError::BodyTooLong(body.len()))?;
        let mut msg = Message::new(Header::data(sender, encoding, length), body);
        msg.sign(key)?;
        Ok(msg)
    }

    /// Header-only liveness frame.
    pub fn ping() -> Self {
        Message::new(Header::ping(), Bytes::new())
    }

    pub fn is_ping(&self) -> bool {
        self.header.is_ping()
    }

    pub fn sign(&mut self, key: &SigningKey) -> Result<(), ProtocolError> {
        self.header.signature = sign(&self.header, &self.body, key)?;
        Ok(())
    }

    pub fn verify(&self, key: &VerifyingKey) -> bool {
        verify(&self.header, &self.body, key)
    }

    pub fn encode(&self) -> Bytes {
        encode(&self.header, &self.body)
    }

    pub fn decode_body(&self) -> Result<Body, ProtocolError> {
        encoding::registry().decode(self.header.encoding, &self.body)
    }
}
