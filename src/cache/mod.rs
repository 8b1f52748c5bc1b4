//! Keyed caches shared by the fee and market-anchor paths.
//!
//! Freshness is always decided by comparing a stored `expires_at` against an
//! injected [`Clock`], never by the backing store's own eviction, so tests can
//! move time explicitly.

use crate::market::distribution::MarketAnchor;
use crate::models::MarketplaceId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock as StdRwLock},
};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryCacheStore;
pub use redis_store::RedisCacheStore;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: StdRwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: StdRwLock::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct CachedValue<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// In-process TTL map owned by whichever service constructs it.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CachedValue<V>>>,
    clock: Arc<dyn Clock>,
}

impl<V: Clone + Send + Sync> TtlCache<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    /// A non-positive `ttl` stores nothing.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: chrono::Duration) {
        if ttl <= chrono::Duration::zero() {
            return;
        }
        let expires_at = self.clock.now() + ttl;
        let mut entries = self.entries.write().await;
        entries.insert(key.into(), CachedValue { value, expires_at });
    }

    pub async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

/// Per-key async locks used to collapse concurrent cold-cache lookups into a
/// single upstream call.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(String),
    #[error("cached value could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeeCacheKey {
    pub asin: String,
    pub price_cents: i64,
    pub marketplace: MarketplaceId,
    pub platform_fulfilled: bool,
}

impl FeeCacheKey {
    pub fn new(asin: &str, price: f64, marketplace: MarketplaceId, platform_fulfilled: bool) -> Self {
        Self {
            asin: asin.trim().to_uppercase(),
            price_cents: crate::measurements::to_cents(price),
            marketplace,
            platform_fulfilled,
        }
    }

    pub fn storage_key(&self) -> String {
        format!(
            "fee:{}:{}:{}:{}",
            self.asin,
            self.price_cents,
            self.marketplace.code(),
            if self.platform_fulfilled { "fba" } else { "fbm" }
        )
    }
}

/// A stored fee quote. Both components are plain numbers: a quote missing
/// either one has no representation here and so can never be cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeCacheEntry {
    pub key: FeeCacheKey,
    pub fulfillment_fee: f64,
    pub referral_fee: f64,
    pub total_fee: f64,
    pub currency: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FeeCacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn is_usable(&self) -> bool {
        [self.fulfillment_fee, self.referral_fee]
            .iter()
            .all(|fee| fee.is_finite() && *fee >= 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorKey {
    pub keyword: String,
    pub marketplace: MarketplaceId,
}

impl AnchorKey {
    pub fn new(keyword: &str, marketplace: MarketplaceId) -> Self {
        Self {
            keyword: normalize_keyword(keyword),
            marketplace,
        }
    }

    pub fn storage_key(&self) -> String {
        format!("anchor:{}:{}", self.marketplace.code(), self.keyword)
    }
}

pub fn normalize_keyword(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Fee and market-anchor tables. Implementations only need get-by-key and
/// upsert; expiry is judged by callers from the stored timestamps.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_fee(&self, key: &FeeCacheKey) -> Result<Option<FeeCacheEntry>, CacheError>;
    async fn upsert_fee(&self, entry: &FeeCacheEntry) -> Result<(), CacheError>;
    async fn get_anchor(&self, key: &AnchorKey) -> Result<Option<MarketAnchor>, CacheError>;
    async fn upsert_anchor(&self, key: &AnchorKey, anchor: &MarketAnchor)
    -> Result<(), CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn ttl_cache_expires_with_the_clock() {
        let clock = clock();
        let cache: TtlCache<String> = TtlCache::new(clock.clone());
        cache
            .set("seller-a", "token-1".to_string(), chrono::Duration::minutes(10))
            .await;
        assert_eq!(cache.get("seller-a").await.as_deref(), Some("token-1"));

        clock.advance(chrono::Duration::minutes(10));
        assert!(cache.get("seller-a").await.is_none());
    }

    #[tokio::test]
    async fn ttl_cache_ignores_non_positive_ttl_and_supports_remove() {
        let cache: TtlCache<u32> = TtlCache::new(clock());
        cache.set("zero", 1, chrono::Duration::zero()).await;
        assert!(cache.get("zero").await.is_none());

        cache.set("kept", 2, chrono::Duration::seconds(30)).await;
        cache.remove("kept").await;
        assert!(cache.get("kept").await.is_none());
    }

    #[test]
    fn fee_key_is_normalized() {
        let key = FeeCacheKey::new(" b00test123 ", 19.99, MarketplaceId::Us, true);
        assert_eq!(key.storage_key(), "fee:B00TEST123:1999:US:fba");
        let other = FeeCacheKey::new("B00TEST123", 19.99, MarketplaceId::Us, false);
        assert_ne!(key, other);
    }

    #[test]
    fn anchor_key_collapses_whitespace_and_case() {
        let key = AnchorKey::new("  Yoga   MAT ", MarketplaceId::De);
        assert_eq!(key.keyword, "yoga mat");
        assert_eq!(key.storage_key(), "anchor:DE:yoga mat");
    }

    #[tokio::test]
    async fn keyed_locks_serialize_same_key() {
        let locks = Arc::new(KeyedLocks::default());
        let guard = locks.acquire("fee:A").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("fee:A").await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different key is never blocked.
        let _other = locks.acquire("fee:B").await;

        drop(guard);
        contender.await.expect("contender completes");
    }
}
