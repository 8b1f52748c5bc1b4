use super::{AnchorKey, CacheError, CacheStore, FeeCacheEntry, FeeCacheKey};
use crate::market::distribution::MarketAnchor;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

/// Redis-backed store. Values are JSON; `SET EX` is only a backstop so stale
/// rows eventually disappear, freshness is still judged from `expires_at`.
#[derive(Clone)]
pub struct RedisCacheStore {
    client: redis::Client,
}

impl RedisCacheStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn from_url(url: &str) -> Result<Self, CacheError> {
        redis::Client::open(url)
            .map(Self::new)
            .map_err(|err| CacheError::Backend(err.to_string()))
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|err| CacheError::Decode(err.to_string())),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expires_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(value).map_err(|err| CacheError::Decode(err.to_string()))?;
        let ttl_secs = backstop_ttl_secs(expires_at, Utc::now());
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        let _: () = conn
            .set_ex(key, json, ttl_secs)
            .await
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        debug!(target: "market.cache", key = %key, ttl_secs, "redis_upsert");
        Ok(())
    }
}

fn backstop_ttl_secs(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (expires_at - now).num_seconds().max(1) as u64
}

#[async_trait::async_trait]
impl CacheStore for RedisCacheStore {
    async fn get_fee(&self, key: &FeeCacheKey) -> Result<Option<FeeCacheEntry>, CacheError> {
        self.read(&key.storage_key()).await
    }

    async fn upsert_fee(&self, entry: &FeeCacheEntry) -> Result<(), CacheError> {
        self.write(&entry.key.storage_key(), entry, entry.expires_at)
            .await
    }

    async fn get_anchor(&self, key: &AnchorKey) -> Result<Option<MarketAnchor>, CacheError> {
        self.read(&key.storage_key()).await
    }

    async fn upsert_anchor(
        &self,
        key: &AnchorKey,
        anchor: &MarketAnchor,
    ) -> Result<(), CacheError> {
        self.write(&key.storage_key(), anchor, anchor.expires_at)
            .await
    }
}
