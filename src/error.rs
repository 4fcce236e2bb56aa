//! Error types for registry operations.

use snafu::Snafu;

use crate::datastore::DatastoreError;

/// Errors surfaced by [`ProviderRegistry`](crate::ProviderRegistry) operations.
///
/// Malformed keys and records encountered while scanning the backend are never
/// surfaced here; they are logged and skipped at the scan site.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RegistryError {
    /// The durable backend failed.
    #[snafu(display("backend failure: {source}"))]
    Backend {
        /// The underlying datastore error.
        source: DatastoreError,
    },

    /// The registry worker has been shut down; no further operations are admitted.
    #[snafu(display("provider registry has shut down"))]
    Shutdown,
}

/// Convenience Result type for registry operations.
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
