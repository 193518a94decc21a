// =============================================================================
// MESHCAST CORE — encoding.rs
// =============================================================================
//
// Registry of body decoders keyed by the header's `encoding` tag.
//
// The registry is built once and then only read. A process may install its
// own registry at startup with `install`; otherwise the built-in one is
// used. Header validation treats any tag missing from the registry as an
// unknown encoding.
// =============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use crate::error::ProtocolError;

pub const ENCODING_RAW: i8 = 1;
pub const ENCODING_TEXT: i8 = 2;
pub const ENCODING_JSON: i8 = 3;

/// A decoded message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Raw(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Raw(b) => write!(f, "<{} raw bytes>", b.len()),
            Body::Text(s) => write!(f, "{}", s),
            Body::Json(v) => write!(f, "{}", v),
        }
    }
}

pub type DecodeFn = fn(&[u8]) -> Result<Body, String>;

#[derive(Clone, Copy)]
struct Decoder {
    name: &'static str,
    decode: DecodeFn,
}

// -----------------------------------------------------------------------------
// EncodingRegistry
// -----------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct EncodingRegistry {
    decoders: BTreeMap<i8, Decoder>,
}

impl EncodingRegistry {
    /// Registry with no decoders; every tag is unknown.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Raw, text and JSON decoders.
    pub fn with_defaults() -> Self {
        Self::empty()
            .register(ENCODING_RAW, "raw", |b| Ok(Body::Raw(b.to_vec())))
            .register(ENCODING_TEXT, "text", |b| {
                std::str::from_utf8(b)
                    .map(|s| Body::Text(s.to_string()))
                    .map_err(|e| e.to_string())
            })
            .register(ENCODING_JSON, "json", |b| {
                serde_json::from_slice(b).map(Body::Json).map_err(|e| e.to_string())
            })
    }

    /// Adds or replaces the decoder for `tag`.
    pub fn register(mut self, tag: i8, name: &'static str, decode: DecodeFn) -> Self {
        self.decoders.insert(tag, Decoder { name, decode });
        self
    }

    pub fn is_known(&self, tag: i8) -> bool {
        self.decoders.contains_key(&tag)
    }

    pub fn name(&self, tag: i8) -> Option<&'static str> {
        self.decoders.get(&tag).map(|d| d.name)
    }

    pub fn tags(&self) -> impl Iterator<Item = i8> + '_ {
        self.decoders.keys().copied()
    }

    pub fn decode(&self, tag: i8, body: &[u8]) -> Result<Body, ProtocolError> {
        let decoder = self.decoders.get(&tag).ok_or_else(|| ProtocolError::Decode {
            encoding: tag,
            reason: "no decoder registered".into(),
        })?;
        (decoder.decode)(body).map_err(|reason| ProtocolError::Decode { encoding: tag, reason })
    }
}

impl fmt::Debug for EncodingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.decoders.iter().map(|(tag, d)| (tag, d.name)))
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Process-wide registry
// -----------------------------------------------------------------------------

static REGISTRY: OnceLock<EncodingRegistry> = OnceLock::new();

/// Installs the process-wide registry. Fails, handing the registry back, if
/// one was already installed or the defaults were already read.
pub fn install(registry: EncodingRegistry) -> Result<(), EncodingRegistry> {
    REGISTRY.set(registry)
}

/// The process-wide registry, defaulting to `with_defaults()` on first use.
pub fn registry() -> &'static EncodingRegistry {
    REGISTRY.get_or_init(EncodingRegistry::with_defaults)
}
