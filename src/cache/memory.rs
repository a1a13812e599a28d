//! In-memory cache implementation using moka
//!
//! Values are stored as JSON so any serializable type fits. Every entry
//! carries its own TTL, capped by the cache-wide default.

use super::CacheLayer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default maximum cache capacity (number of entries)
const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// Default TTL for cache entries (1 hour)
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
struct CacheEntry {
    /// JSON-serialized value
    data: Arc<String>,
    ttl: Duration,
}

impl CacheEntry {
    fn new<T: Serialize>(value: &T, ttl: Duration) -> Result<Self> {
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;
        Ok(Self {
            data: Arc::new(json),
            ttl,
        })
    }

    fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data).context("Failed to deserialize cache value")
    }
}

/// Expiry policy reading the TTL stored in each entry
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &CacheEntry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory cache using moka
pub struct MemoryCache {
    cache: Cache<String, CacheEntry>,
    default_ttl: Duration,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entry_count", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl MemoryCache {
    /// 10,000 entries, one hour TTL
    pub fn new() -> Self {
        Self::with_capacity_and_ttl(DEFAULT_MAX_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_capacity_and_ttl(max_capacity: u64, default_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { cache, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Glob match where `*` is any run of characters and `?` exactly one
    fn pattern_matches(pattern: &str, key: &str) -> bool {
        let pattern: Vec<char> = pattern.chars().collect();
        let key: Vec<char> = key.chars().collect();

        // matched[j]: pattern[..i] matches key[..j]
        let mut matched = vec![false; key.len() + 1];
        matched[0] = true;
        for p in &pattern {
            let mut next = vec![false; key.len() + 1];
            match p {
                '*' => {
                    let mut seen = false;
                    for j in 0..=key.len() {
                        seen |= matched[j];
                        next[j] = seen;
                    }
                }
                _ => {
                    for j in 1..=key.len() {
                        next[j] = matched[j - 1] && (*p == '?' || *p == key[j - 1]);
                    }
                }
            }
            matched = next;
        }
        matched[key.len()]
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheLayer for MemoryCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.cache.get(key).await {
            Some(entry) => Ok(Some(entry.deserialize()?)),
            None => Ok(None),
        }
    }

    /// Entries never outlive the cache-wide default TTL
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(value, ttl.min(self.default_ttl))?;
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        let keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, _)| Self::pattern_matches(pattern, key.as_ref()))
            .map(|(key, _)| (*key).clone())
            .collect();
        for key in keys {
            self.cache.invalidate(&key).await;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("story:slug:a", &vec![1, 2, 3], Duration::from_secs(60)).await.unwrap();
        let value: Option<Vec<i32>> = cache.get("story:slug:a").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));

        cache.delete("story:slug:a").await.unwrap();
        let value: Option<Vec<i32>> = cache.get("story:slug:a").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_delete_pattern_keeps_other_namespaces() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("i18n:catalog:en", &"en", ttl).await.unwrap();
        cache.set("i18n:catalog:es", &"es", ttl).await.unwrap();
        cache.set("settings:site", &"s", ttl).await.unwrap();

        cache.delete_pattern("i18n:*").await.unwrap();
        assert!(cache.get::<String>("i18n:catalog:en").await.unwrap().is_none());
        assert!(cache.get::<String>("i18n:catalog:es").await.unwrap().is_none());
        assert!(cache.get::<String>("settings:site").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_per_entry_ttl() {
        let cache = MemoryCache::new();
        cache.set("short", &1, Duration::from_millis(10)).await.unwrap();
        cache.set("long", &2, Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.cache.run_pending_tasks().await;
        assert!(cache.get::<i32>("short").await.unwrap().is_none());
        assert_eq!(cache.get::<i32>("long").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = MemoryCache::new();
        cache.set("a", &1, Duration::from_secs(60)).await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.get::<i32>("a").await.unwrap().is_none());
    }

    #[test]
    fn test_pattern_matches() {
        assert!(MemoryCache::pattern_matches("i18n:*", "i18n:catalog:en"));
        assert!(MemoryCache::pattern_matches("story:?", "story:1"));
        assert!(!MemoryCache::pattern_matches("story:?", "story:12"));
        assert!(MemoryCache::pattern_matches("*", ""));
        assert!(!MemoryCache::pattern_matches("i18n:*", "settings:site"));
    }

    proptest! {
        /// A key always matches itself and a trailing `*` after any prefix
        #[test]
        fn property_prefix_patterns_match(key in "[a-z:]{0,20}", cut in 0usize..20) {
            let cut = cut.min(key.len());
            prop_assert!(MemoryCache::pattern_matches(&key, &key));
            let pattern = format!("{}*", &key[..cut]);
            prop_assert!(MemoryCache::pattern_matches(&pattern, &key));
        }
    }
}
