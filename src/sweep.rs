//! Expiry sweep over the provider keyspace.
//!
//! A sweep scans every record under the providers prefix, stages deletes for
//! entries older than the configured validity in a single atomic batch, and
//! reconciles the cache with whatever was removed. Entries that fail to
//! parse or decode are logged and skipped; only a failing scan or commit
//! aborts the pass, and an aborted pass commits nothing.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::cache::ProviderCache;
use crate::clock::Clock;
use crate::codec;
use crate::datastore::Datastore;
use crate::datastore::DatastoreError;
use crate::keys;

/// Counters from one completed sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SweepOutcome {
    /// Records seen by the scan.
    pub scanned: u64,
    /// Records staged and deleted as expired.
    pub expired: u64,
    /// Records skipped because their key or value would not parse.
    pub malformed: u64,
}

/// Run one sweep pass. Must be called from the registry worker so the cache
/// reconciliation happens under the serializer.
pub(crate) async fn sweep_expired(
    datastore: &dyn Datastore,
    cache: &mut ProviderCache,
    clock: &dyn Clock,
    provide_validity: Duration,
) -> Result<SweepOutcome, DatastoreError> {
    let validity_ms = provide_validity.as_millis() as u64;
    let mut outcome = SweepOutcome::default();
    let mut batch = datastore.batch();
    let mut deleted: HashMap<String, Vec<String>> = HashMap::new();

    let mut scan = datastore.query(keys::PROVIDERS_PREFIX);
    while let Some(item) = scan.next().await {
        let (key, value) = item?;
        outcome.scanned += 1;

        let (cid_text, peer_text) = match keys::parse_key(&key) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(key = %key, error = %err, "skipping unparseable provider key");
                outcome.malformed += 1;
                continue;
            }
        };

        let timestamp = match codec::decode_timestamp(&value) {
            Ok(ts) => ts,
            Err(err) => {
                warn!(key = %key, error = %err, "skipping provider record with undecodable timestamp");
                outcome.malformed += 1;
                continue;
            }
        };

        if clock.now_ms().saturating_sub(timestamp) > validity_ms {
            batch.delete(&key);
            deleted
                .entry(cid_text.to_string())
                .or_default()
                .push(peer_text.to_string());
            outcome.expired += 1;
        }
    }

    if !deleted.is_empty() {
        batch.commit().await?;
    }

    for (cid_text, peers) in &deleted {
        if let Some(map) = cache.get_mut(cid_text) {
            for peer_text in peers {
                map.remove(peer_text);
            }
            if map.is_empty() {
                cache.remove(cid_text);
            }
        }
    }

    if outcome.expired > 0 {
        info!(
            scanned = outcome.scanned,
            expired = outcome.expired,
            malformed = outcome.malformed,
            "provider sweep completed"
        );
    } else {
        debug!(scanned = outcome.scanned, malformed = outcome.malformed, "provider sweep found nothing expired");
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use bytes::Bytes;

    use super::*;
    use crate::cache::PeerMap;
    use crate::clock::ManualClock;
    use crate::datastore::MemoryDatastore;
    use crate::types::ContentId;
    use crate::types::PeerId;

    const VALIDITY: Duration = Duration::from_millis(1_000);

    fn cache() -> ProviderCache {
        ProviderCache::new(NonZeroUsize::new(16).unwrap())
    }

    async fn seed(store: &MemoryDatastore, cid: &ContentId, peer: &PeerId, ts: u64) {
        store
            .put(&keys::record_key(cid, peer), codec::encode_timestamp(ts))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deletes_expired_records_from_backend() {
        let store = MemoryDatastore::new();
        let clock = ManualClock::new(2_000);
        let mut cache = cache();

        let cid = ContentId::from_bytes(&b"cid-a"[..]);
        let peer = PeerId::from_bytes(vec![0x01]);
        seed(&store, &cid, &peer, 0).await;

        let outcome = sweep_expired(&store, &mut cache, &clock, VALIDITY).await.unwrap();

        assert_eq!(outcome.scanned, 1);
        assert_eq!(outcome.expired, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn leaves_records_within_validity() {
        let store = MemoryDatastore::new();
        let clock = ManualClock::new(2_000);
        let mut cache = cache();

        let cid = ContentId::from_bytes(&b"cid-a"[..]);
        // Exactly at the validity boundary: not expired.
        seed(&store, &cid, &PeerId::from_bytes(vec![0x01]), 1_000).await;
        seed(&store, &cid, &PeerId::from_bytes(vec![0x02]), 1_500).await;

        let outcome = sweep_expired(&store, &mut cache, &clock, VALIDITY).await.unwrap();

        assert_eq!(outcome.expired, 0);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn selective_expiry_keeps_fresh_peers() {
        let store = MemoryDatastore::new();
        let clock = ManualClock::new(2_000);
        let mut cache = cache();

        let cid = ContentId::from_bytes(&b"cid-a"[..]);
        let stale = PeerId::from_bytes(vec![0x01]);
        let fresh = PeerId::from_bytes(vec![0x02]);
        seed(&store, &cid, &stale, 0).await;
        seed(&store, &cid, &fresh, 1_500).await;

        let outcome = sweep_expired(&store, &mut cache, &clock, VALIDITY).await.unwrap();

        assert_eq!(outcome.expired, 1);
        assert!(store.get(&keys::record_key(&cid, &stale)).await.is_none());
        assert!(store.get(&keys::record_key(&cid, &fresh)).await.is_some());
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped_not_fatal() {
        let store = MemoryDatastore::new();
        let clock = ManualClock::new(2_000);
        let mut cache = cache();

        let cid = ContentId::from_bytes(&b"cid-a"[..]);
        let peer = PeerId::from_bytes(vec![0x01]);
        // Undecodable value: truncated varint.
        store
            .put(&keys::record_key(&cid, &peer), Bytes::from_static(&[0xff]))
            .await
            .unwrap();
        // Unparseable key shape.
        store
            .put("/providers/only-a-cid", codec::encode_timestamp(0))
            .await
            .unwrap();
        // A well-formed expired record alongside them.
        let other = ContentId::from_bytes(&b"cid-b"[..]);
        seed(&store, &other, &peer, 0).await;

        let outcome = sweep_expired(&store, &mut cache, &clock, VALIDITY).await.unwrap();

        assert_eq!(outcome.malformed, 2);
        assert_eq!(outcome.expired, 1);
        // The malformed entries survive; the expired one is gone.
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn reconciles_cache_after_deletes() {
        let store = MemoryDatastore::new();
        let clock = ManualClock::new(2_000);
        let mut cache = cache();

        let cid = ContentId::from_bytes(&b"cid-a"[..]);
        let stale = PeerId::from_bytes(vec![0x01]);
        let fresh = PeerId::from_bytes(vec![0x02]);
        seed(&store, &cid, &stale, 0).await;
        seed(&store, &cid, &fresh, 1_500).await;

        let mut map = PeerMap::new();
        map.insert(stale.text(), 0);
        map.insert(fresh.text(), 1_500);
        cache.put(cid.text(), map);

        sweep_expired(&store, &mut cache, &clock, VALIDITY).await.unwrap();

        let cached = cache.get(&cid.text()).unwrap();
        assert_eq!(cached.len(), 1);
        assert!(cached.contains_key(&fresh.text()));
    }

    /// Wraps a [`MemoryDatastore`] and fails batch commits while the flag is set.
    struct FlakyCommitStore {
        inner: MemoryDatastore,
        fail_commits: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    struct FlakyBatch {
        inner: Box<dyn crate::datastore::Batch>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl crate::datastore::Batch for FlakyBatch {
        fn delete(&mut self, key: &str) {
            self.inner.delete(key);
        }

        async fn commit(self: Box<Self>) -> Result<(), DatastoreError> {
            if self.fail {
                return Err(DatastoreError::Io {
                    message: "commit refused".to_string(),
                });
            }
            self.inner.commit().await
        }
    }

    #[async_trait::async_trait]
    impl Datastore for FlakyCommitStore {
        async fn put(&self, key: &str, value: Bytes) -> Result<(), DatastoreError> {
            self.inner.put(key, value).await
        }

        fn query(&self, prefix: &str) -> futures::stream::BoxStream<'static, crate::datastore::ScanItem> {
            self.inner.query(prefix)
        }

        fn batch(&self) -> Box<dyn crate::datastore::Batch> {
            Box::new(FlakyBatch {
                inner: self.inner.batch(),
                fail: self.fail_commits.load(std::sync::atomic::Ordering::SeqCst),
            })
        }
    }

    #[tokio::test]
    async fn failed_commit_aborts_the_pass_and_the_next_one_retries() {
        use std::sync::atomic::AtomicBool;
        use std::sync::atomic::Ordering;

        let fail_commits = std::sync::Arc::new(AtomicBool::new(true));
        let store = FlakyCommitStore {
            inner: MemoryDatastore::new(),
            fail_commits: fail_commits.clone(),
        };
        let clock = ManualClock::new(2_000);
        let mut cache = cache();

        let cid = ContentId::from_bytes(&b"cid-a"[..]);
        let peer = PeerId::from_bytes(vec![0x01]);
        seed(&store.inner, &cid, &peer, 0).await;

        let mut map = PeerMap::new();
        map.insert(peer.text(), 0);
        cache.put(cid.text(), map);

        // The commit fails: nothing is deleted and the cache is untouched.
        assert!(sweep_expired(&store, &mut cache, &clock, VALIDITY).await.is_err());
        assert_eq!(store.inner.len().await, 1);
        assert!(cache.get(&cid.text()).is_some());

        // The next pass starts from scratch and succeeds.
        fail_commits.store(false, Ordering::SeqCst);
        let outcome = sweep_expired(&store, &mut cache, &clock, VALIDITY).await.unwrap();
        assert_eq!(outcome.expired, 1);
        assert!(store.inner.is_empty().await);
        assert!(cache.get(&cid.text()).is_none());
    }

    #[tokio::test]
    async fn drops_cache_entry_when_every_peer_expires() {
        let store = MemoryDatastore::new();
        let clock = ManualClock::new(5_000);
        let mut cache = cache();

        let cid = ContentId::from_bytes(&b"cid-a"[..]);
        let peer = PeerId::from_bytes(vec![0x01]);
        seed(&store, &cid, &peer, 0).await;

        let mut map = PeerMap::new();
        map.insert(peer.text(), 0);
        cache.put(cid.text(), map);

        sweep_expired(&store, &mut cache, &clock, VALIDITY).await.unwrap();

        assert!(cache.get(&cid.text()).is_none());
        assert_eq!(cache.len(), 0);
    }
}
