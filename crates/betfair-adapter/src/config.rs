//! Pipeline configuration
//!
//! Defaults match production behaviour; every knob can be overridden from the
//! environment (`BF_*`) and again from CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::ClassTtls;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub book_ttl: Duration,
    pub catalog_ttl: Duration,
    pub navigation_ttl: Duration,
    pub stats_ttl: Duration,
    /// Market ids per listMarketCatalogue call
    pub catalog_batch_size: usize,
    /// Market ids per listMarketBook call
    pub book_batch_size: usize,
    pub max_concurrent_batches: usize,
    /// How long a caller waits on someone else's refetch; `None` waits indefinitely
    pub wait_timeout: Option<Duration>,
    /// maxResults for catalogue listings
    pub catalog_max_results: u32,
    /// Directory for persisted payloads; `None` keeps the cache in memory only
    pub cache_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let ttls = ClassTtls::default();
        Self {
            book_ttl: ttls.book,
            catalog_ttl: ttls.catalog,
            navigation_ttl: ttls.navigation,
            stats_ttl: ttls.stats,
            catalog_batch_size: 5,
            book_batch_size: 5,
            max_concurrent_batches: 4,
            wait_timeout: None,
            catalog_max_results: 100,
            cache_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `BF_*` environment variables. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `BF_*` key
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok()).map(Duration::from_secs);
        let count = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok()).filter(|n| *n > 0);

        let defaults = Self::default();
        Self {
            book_ttl: secs("BF_BOOK_TTL_SECS").unwrap_or(defaults.book_ttl),
            catalog_ttl: secs("BF_CATALOG_TTL_SECS").unwrap_or(defaults.catalog_ttl),
            navigation_ttl: secs("BF_NAVIGATION_TTL_SECS").unwrap_or(defaults.navigation_ttl),
            stats_ttl: secs("BF_STATS_TTL_SECS").unwrap_or(defaults.stats_ttl),
            catalog_batch_size: count("BF_CATALOG_BATCH_SIZE").unwrap_or(defaults.catalog_batch_size),
            book_batch_size: count("BF_BOOK_BATCH_SIZE").unwrap_or(defaults.book_batch_size),
            max_concurrent_batches: count("BF_MAX_CONCURRENT_BATCHES").unwrap_or(defaults.max_concurrent_batches),
            wait_timeout: secs("BF_WAIT_TIMEOUT_SECS").or(defaults.wait_timeout),
            catalog_max_results: lookup("BF_CATALOG_MAX_RESULTS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.catalog_max_results),
            cache_dir: lookup("BF_CACHE_DIR").filter(|v| !v.trim().is_empty()).map(PathBuf::from),
        }
    }

    /// Per-class TTLs for the freshness caches
    pub fn class_ttls(&self) -> ClassTtls {
        ClassTtls {
            book: self.book_ttl,
            catalog: self.catalog_ttl,
            navigation: self.navigation_ttl,
            stats: self.stats_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.book_ttl, Duration::from_secs(5));
        assert_eq!(config.catalog_batch_size, 5);
        assert_eq!(config.catalog_max_results, 100);
        assert_eq!(config.class_ttls(), ClassTtls::default());
    }

    #[test]
    fn test_lookup_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BF_BOOK_TTL_SECS", "2"),
            ("BF_CATALOG_BATCH_SIZE", "10"),
            ("BF_BOOK_BATCH_SIZE", "0"),
            ("BF_MAX_CONCURRENT_BATCHES", "lots"),
            ("BF_WAIT_TIMEOUT_SECS", "30"),
            ("BF_CACHE_DIR", "/tmp/bf"),
        ]);
        let config = PipelineConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.book_ttl, Duration::from_secs(2));
        assert_eq!(config.catalog_batch_size, 10);
        assert_eq!(config.book_batch_size, 5);
        assert_eq!(config.max_concurrent_batches, 4);
        assert_eq!(config.wait_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/bf")));
        assert_eq!(config.class_ttls().book, Duration::from_secs(2));
    }
}
