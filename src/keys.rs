//! Backend key layout.
//!
//! Provider records live under `/providers/<cid-text>/<peer-text>`. The
//! layout is bit-stable for on-disk compatibility: a single leading slash,
//! no trailing slash, exactly two path segments after the prefix. Keys that
//! do not match this shape are rejected, never normalized.

use snafu::Snafu;

use crate::types::ContentId;
use crate::types::PeerId;

/// Root prefix under which all provider records are stored.
pub const PROVIDERS_PREFIX: &str = "/providers";

/// Errors parsing a backend key.
///
/// These only arise while scanning the backend; callers log and skip the
/// offending entry rather than aborting.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum KeyError {
    /// The key does not have the `/providers/<cid>/<peer>` shape.
    #[snafu(display("malformed provider key: {key}"))]
    Malformed {
        /// The offending key.
        key: String,
    },
}

/// Prefix covering every record for one content id.
pub fn cid_prefix(cid: &ContentId) -> String {
    format!("{}/{}", PROVIDERS_PREFIX, cid.text())
}

/// Full key of a single provider record.
pub fn record_key(cid: &ContentId, peer: &PeerId) -> String {
    format!("{}/{}/{}", PROVIDERS_PREFIX, cid.text(), peer.text())
}

/// Split a backend key into its `(cid_text, peer_text)` segments.
pub fn parse_key(key: &str) -> Result<(&str, &str), KeyError> {
    let mut parts = key.split('/');
    let shape = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    );
    match shape {
        (Some(""), Some("providers"), Some(cid), Some(peer), None) if !cid.is_empty() && !peer.is_empty() => {
            Ok((cid, peer))
        }
        _ => MalformedSnafu { key }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn cid(bytes: &[u8]) -> ContentId {
        ContentId::from_bytes(bytes.to_vec())
    }

    fn peer(bytes: &[u8]) -> PeerId {
        PeerId::from_bytes(bytes.to_vec())
    }

    #[test]
    fn record_key_composes_prefix_cid_and_peer() {
        let key = record_key(&cid(b"hello"), &peer(&[0xab, 0xcd]));
        assert_eq!(key, "/providers/nbswy3dp/abcd");
    }

    #[test]
    fn cid_prefix_covers_all_record_keys_for_that_cid() {
        let c = cid(b"hello");
        let key = record_key(&c, &peer(&[0x01]));
        assert!(key.starts_with(&cid_prefix(&c)));
    }

    #[test]
    fn parse_key_recovers_both_segments() {
        let (cid_text, peer_text) = parse_key("/providers/nbswy3dp/abcd").unwrap();
        assert_eq!(cid_text, "nbswy3dp");
        assert_eq!(peer_text, "abcd");
    }

    #[test]
    fn parse_key_rejects_wrong_shapes() {
        for key in [
            "",
            "/",
            "/providers",
            "/providers/",
            "/providers/cid",
            "/providers/cid/",
            "/providers//peer",
            "/providers/cid/peer/extra",
            "providers/cid/peer",
            "/records/cid/peer",
            "/providers/cid/peer/",
        ] {
            assert!(parse_key(key).is_err(), "accepted {key:?}");
        }
    }

    proptest! {
        #[test]
        fn roundtrip_any_identifiers(cid_bytes in proptest::collection::vec(any::<u8>(), 1..48),
                                     peer_bytes in proptest::collection::vec(any::<u8>(), 1..48)) {
            let c = ContentId::from_bytes(cid_bytes);
            let p = PeerId::from_bytes(peer_bytes);
            let key = record_key(&c, &p);
            let (cid_text, peer_text) = parse_key(&key).unwrap();
            prop_assert_eq!(cid_text, c.text());
            prop_assert_eq!(peer_text, p.text());
        }
    }
}
