use serde::{Deserialize, Serialize};

/// How a fetch balances cached data against the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Serve only what is cached; never touch the network.
    CacheOnly,
    /// Always go to the network; never read the cache.
    NetworkOnly,
    /// Network first, cached value (even stale) on failure.
    #[default]
    NetworkFirst,
    /// Fresh cache if present, else network, else stale cache.
    CacheFirst,
    /// Serve any cached value immediately and refresh it in the background.
    StaleWhileRevalidate,
}

impl FetchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheOnly => "cache_only",
            Self::NetworkOnly => "network_only",
            Self::NetworkFirst => "network_first",
            Self::CacheFirst => "cache_first",
            Self::StaleWhileRevalidate => "stale_while_revalidate",
        }
    }

    /// Whether this strategy may read cached values.
    pub fn reads_cache(&self) -> bool {
        !matches!(self, Self::NetworkOnly)
    }
}

impl std::fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
