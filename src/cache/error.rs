use std::error::Error as StdError;

use thiserror::Error;

use super::CacheKey;

/// A failure talking to the backing key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache store operation failed: {source}")]
    Backend {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl StoreError {
    pub fn backend(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Backend {
            source: source.into(),
        }
    }
}

/// Everything the cache reports through its `error` signal. None of these
/// ever reach the client; the request proceeds without the cache instead.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to fetch {key}: {source}")]
    Fetch {
        key: CacheKey,
        #[source]
        source: StoreError,
    },

    #[error("failed to admit rebuild of {key}: {source}")]
    Admit {
        key: CacheKey,
        #[source]
        source: StoreError,
    },

    #[error("failed to persist {key}: {source}")]
    Persist {
        key: CacheKey,
        #[source]
        source: StoreError,
    },

    #[error("corrupt cache entry at {key}: {source}")]
    Corrupt {
        key: CacheKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode cache entry for {key}: {source}")]
    Encode {
        key: CacheKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("response body for {key} is not valid UTF-8; not cached")]
    NonUtf8Body { key: CacheKey },
}

impl CacheError {
    /// The key whose request produced this error.
    pub fn key(&self) -> &CacheKey {
        match self {
            Self::Fetch { key, .. }
            | Self::Admit { key, .. }
            | Self::Persist { key, .. }
            | Self::Corrupt { key, .. }
            | Self::Encode { key, .. }
            | Self::NonUtf8Body { key } => key,
        }
    }
}
