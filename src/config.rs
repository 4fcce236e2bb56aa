//! Registry configuration.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Configuration for the provider registry.
///
/// Both intervals are wall-clock durations; on the serde wire they are
/// plain integers of milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Number of content ids held in the in-memory cache.
    /// Default: 256
    pub cache_size: usize,

    /// Interval between expiry sweeps.
    /// Default: 1 hour
    #[serde(with = "duration_ms")]
    pub cleanup_interval: Duration,

    /// Age after which a provider record is considered stale and swept.
    /// Default: 24 hours
    #[serde(with = "duration_ms")]
    pub provide_validity: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_size: 256,
            cleanup_interval: Duration::from_secs(60 * 60),
            provide_validity: Duration::from_secs(24 * 60 * 60),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
