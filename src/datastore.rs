//! Durable backend contract and the in-memory implementation.
//!
//! The registry depends on a [`Datastore`] capability set rather than a
//! concrete store: single-key put, prefix scan, and atomic batched deletes.
//! Production deployments supply a persistent implementation;
//! [`MemoryDatastore`] is the deterministic, non-persistent implementation
//! used in unit, property, and simulation tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use snafu::Snafu;
use tokio::sync::Mutex;

/// Errors from datastore operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DatastoreError {
    /// An I/O failure in the underlying store.
    #[snafu(display("datastore i/o error: {message}"))]
    Io {
        /// Description of the failure.
        message: String,
    },
}

/// Items yielded by a prefix scan.
pub type ScanItem = Result<(String, Bytes), DatastoreError>;

/// Ordered key-value backend with prefix scan and atomic batched deletes.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    /// Write a single key-value pair, overwriting any existing value.
    async fn put(&self, key: &str, value: Bytes) -> Result<(), DatastoreError>;

    /// Stream every `(key, value)` pair whose key starts with `prefix`.
    fn query(&self, prefix: &str) -> BoxStream<'static, ScanItem>;

    /// Open a batch of staged deletes committed atomically.
    fn batch(&self) -> Box<dyn Batch>;
}

/// A set of staged deletes applied atomically on commit.
///
/// Either every staged delete is applied or none is; a failed commit leaves
/// the store unchanged.
#[async_trait]
pub trait Batch: Send {
    /// Stage a key for deletion.
    fn delete(&mut self, key: &str);

    /// Apply all staged deletes atomically.
    async fn commit(self: Box<Self>) -> Result<(), DatastoreError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: Datastore + ?Sized> Datastore for Arc<T> {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), DatastoreError> {
        (**self).put(key, value).await
    }

    fn query(&self, prefix: &str) -> BoxStream<'static, ScanItem> {
        (**self).query(prefix)
    }

    fn batch(&self) -> Box<dyn Batch> {
        (**self).batch()
    }
}

/// In-memory deterministic [`Datastore`] for testing.
///
/// Keys are held in a `BTreeMap`, so scans come back in lexicographic key
/// order. Clones share the same underlying map, which lets a test drop a
/// registry and build a fresh one over the same "disk".
#[derive(Clone, Default)]
pub struct MemoryDatastore {
    inner: Arc<Mutex<BTreeMap<String, Bytes>>>,
}

impl MemoryDatastore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a single value, bypassing the scan interface. Test convenience.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.lock().await.get(key).cloned()
    }

    /// Number of keys currently stored. Test convenience.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the store holds no keys. Test convenience.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), DatastoreError> {
        self.inner.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    fn query(&self, prefix: &str) -> BoxStream<'static, ScanItem> {
        let inner = self.inner.clone();
        let prefix = prefix.to_string();
        futures::stream::once(async move {
            let guard = inner.lock().await;
            let items: Vec<ScanItem> = guard
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, value)| Ok((key.clone(), value.clone())))
                .collect();
            futures::stream::iter(items)
        })
        .flatten()
        .boxed()
    }

    fn batch(&self) -> Box<dyn Batch> {
        Box::new(MemoryBatch {
            inner: self.inner.clone(),
            deletes: Vec::new(),
        })
    }
}

/// Staged deletes against a [`MemoryDatastore`].
struct MemoryBatch {
    inner: Arc<Mutex<BTreeMap<String, Bytes>>>,
    deletes: Vec<String>,
}

#[async_trait]
impl Batch for MemoryBatch {
    fn delete(&mut self, key: &str) {
        self.deletes.push(key.to_string());
    }

    async fn commit(self: Box<Self>) -> Result<(), DatastoreError> {
        // One lock acquisition applies every staged delete.
        let mut guard = self.inner.lock().await;
        for key in self.deletes {
            guard.remove(&key);
        }
        Ok(())
    }
}
