use std::time::Duration;

use serde::Deserialize;

use super::ttl::DEFAULT_REFRESH_WINDOW;

/// Process-wide cache settings.
///
/// Every field has a default, so a partial (or empty) document is valid:
///
/// ```
/// use dogpile::cache::CacheConfig;
///
/// let config = CacheConfig::from_json(r#"{ "avoid_caching": true }"#).unwrap();
/// assert!(config.avoid_caching);
/// assert_eq!(config.refresh_window_secs, 30);
/// assert!(config.detach_writes);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disables every caching behavior; requests go straight to the handler.
    pub avoid_caching: bool,
    /// Default refresh window for routes that do not override it.
    pub refresh_window_secs: u64,
    /// Persist captured responses on a spawned task instead of before the
    /// response is returned.
    pub detach_writes: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            avoid_caching: false,
            refresh_window_secs: DEFAULT_REFRESH_WINDOW.as_secs(),
            detach_writes: true,
        }
    }
}

impl CacheConfig {
    /// Parses settings from a JSON document. Missing fields take defaults.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn refresh_window(&self) -> Duration {
        Duration::from_secs(self.refresh_window_secs)
    }
}
