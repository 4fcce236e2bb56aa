//! Local provider registry for a content-addressed peer-to-peer overlay.
//!
//! The registry remembers which peers claim to serve which content items,
//! persists that knowledge across restarts, expires stale claims, and answers
//! lookups cheaply. It is the local authority a routing layer consults on
//! every content lookup.
//!
//! # Architecture
//!
//! Records live in two tiers:
//!
//! 1. **Durable backend** (any [`Datastore`]): one record per `(cid, peer)`
//!    pair at `/providers/<cid-text>/<peer-text>`, valued with the write
//!    timestamp as an LEB128 varint. The backend is the source of truth.
//! 2. **In-memory cache**: a bounded LRU of per-cid provider maps. Losing a
//!    cache entry never loses data; it costs a prefix scan on the next touch.
//!
//! All state-touching work (writes, reads, and the periodic expiry sweep)
//! is serialized through a single worker task, so concurrent callers observe
//! one total order and the two tiers can never be seen mid-mutation.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use provider_registry::{ContentId, MemoryDatastore, PeerId, ProviderRegistry, RegistryConfig, SystemClock};
//!
//! let datastore = Arc::new(MemoryDatastore::new());
//! let (registry, worker) = ProviderRegistry::spawn(datastore, Arc::new(SystemClock), RegistryConfig::default());
//! registry.start().await;
//!
//! let cid = ContentId::from_bytes(content_hash);
//! let peer = PeerId::from_bytes(peer_key);
//! registry.add_provider(&cid, &peer).await?;
//! let providers = registry.get_providers(&cid).await?;
//!
//! registry.shutdown();
//! worker.await?;
//! ```

#![warn(missing_docs)]

mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod datastore;
pub mod error;
pub mod keys;
pub mod registry;
mod sweep;
pub mod types;

// Re-export main public types at crate root
pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use config::RegistryConfig;
pub use datastore::Batch;
pub use datastore::Datastore;
pub use datastore::DatastoreError;
pub use datastore::MemoryDatastore;
pub use error::RegistryError;
pub use error::Result;
pub use registry::ProviderRegistry;
pub use types::ContentId;
pub use types::PeerId;
