//! Cache lifetimes: human time units and the nominal/refresh/storage triple.

use std::time::Duration;

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(60 * 60);
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// How long an admitted rebuild may take before another request is admitted.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(30);

/// `n` minutes.
pub fn minutes(n: u32) -> Duration {
    MINUTE * n
}

/// `n` hours.
pub fn hours(n: u32) -> Duration {
    HOUR * n
}

/// `n` days.
pub fn days(n: u32) -> Duration {
    DAY * n
}

/// Lifetimes applied to one cached route.
///
/// - `nominal`: how long clients may treat the response as fresh, and how
///   long the `Created` refresh marker lives.
/// - `refresh_window`: how long a `Refreshing` marker lives.
/// - storage TTL: `nominal + 2 × refresh_window`, how long the entry itself
///   stays in the store so it can still be served while a rebuild runs.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use dogpile::cache::TtlPolicy;
///
/// let policy = TtlPolicy::new(Duration::from_secs(60));
/// assert_eq!(policy.storage_ttl(), Duration::from_secs(120));
/// assert_eq!(policy.cache_control(), "max-age=60, must-revalidate");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    nominal: Duration,
    refresh_window: Duration,
}

impl TtlPolicy {
    /// A policy for `nominal` with the default 30 second refresh window.
    pub fn new(nominal: Duration) -> Self {
        Self {
            nominal,
            refresh_window: DEFAULT_REFRESH_WINDOW,
        }
    }

    /// How long an admitted rebuild may run before another request is
    /// admitted in its place.
    #[must_use]
    pub fn with_refresh_window(mut self, refresh_window: Duration) -> Self {
        self.refresh_window = refresh_window;
        self
    }

    pub fn nominal(&self) -> Duration {
        self.nominal
    }

    pub fn refresh_window(&self) -> Duration {
        self.refresh_window
    }

    /// Lifetime of the stored entry: `nominal + 2 × refresh_window`.
    pub fn storage_ttl(&self) -> Duration {
        self.nominal + self.refresh_window * 2
    }

    /// Value of the `Cache-Control` header set on every response.
    pub fn cache_control(&self) -> String {
        format!("max-age={}, must-revalidate", self.nominal.as_secs())
    }
}
