//! Opaque identifier types.
//!
//! Content ids and peer ids are carried as opaque byte-strings. The registry
//! never inspects their structure; it only relies on their canonical text
//! forms being stable and injective, because those texts become backend key
//! segments.

use std::fmt;

use bytes::Bytes;
use data_encoding::BASE32_NOPAD;

/// Opaque content-addressed identifier.
///
/// The canonical text form is the lowercase unpadded base32 of the raw
/// bytes, matching the multihash text convention used in backend keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Bytes);

impl ContentId {
    /// Wrap raw identifier bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Canonical text form used in backend keys.
    pub fn text(&self) -> String {
        BASE32_NOPAD.encode(&self.0).to_ascii_lowercase()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Opaque network-participant identifier.
///
/// The canonical text form is the lowercase hex of the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Bytes);

impl PeerId {
    /// Wrap raw identifier bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Canonical text form used in backend keys.
    pub fn text(&self) -> String {
        hex::encode(&self.0)
    }

    /// Reconstruct a peer id from its canonical text form.
    ///
    /// Returns `None` when the text is not the canonical encoding of any
    /// peer id.
    pub fn from_text(text: &str) -> Option<Self> {
        if text.is_empty() || text.bytes().any(|b| b.is_ascii_uppercase()) {
            return None;
        }
        hex::decode(text).ok().map(|bytes| Self(Bytes::from(bytes)))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}
