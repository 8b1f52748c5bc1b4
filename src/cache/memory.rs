use super::{AnchorKey, CacheError, CacheStore, FeeCacheEntry, FeeCacheKey};
use crate::market::distribution::MarketAnchor;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryCacheStore {
    fees: RwLock<HashMap<String, FeeCacheEntry>>,
    anchors: RwLock<HashMap<String, MarketAnchor>>,
}

impl InMemoryCacheStore {
    pub async fn fee_count(&self) -> usize {
        self.fees.read().await.len()
    }
}

#[async_trait::async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get_fee(&self, key: &FeeCacheKey) -> Result<Option<FeeCacheEntry>, CacheError> {
        let fees = self.fees.read().await;
        Ok(fees.get(&key.storage_key()).cloned())
    }

    async fn upsert_fee(&self, entry: &FeeCacheEntry) -> Result<(), CacheError> {
        let mut fees = self.fees.write().await;
        fees.insert(entry.key.storage_key(), entry.clone());
        Ok(())
    }

    async fn get_anchor(&self, key: &AnchorKey) -> Result<Option<MarketAnchor>, CacheError> {
        let anchors = self.anchors.read().await;
        Ok(anchors.get(&key.storage_key()).cloned())
    }

    async fn upsert_anchor(
        &self,
        key: &AnchorKey,
        anchor: &MarketAnchor,
    ) -> Result<(), CacheError> {
        let mut anchors = self.anchors.write().await;
        anchors.insert(key.storage_key(), anchor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketplaceId;
    use chrono::{TimeZone, Utc};

    fn entry(total: f64) -> FeeCacheEntry {
        let fetched_at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        FeeCacheEntry {
            key: FeeCacheKey::new("B0CACHE001", 24.99, MarketplaceId::Us, true),
            fulfillment_fee: total - 3.75,
            referral_fee: 3.75,
            total_fee: total,
            currency: "USD".into(),
            fetched_at,
            expires_at: fetched_at + chrono::Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_on_conflicting_key() {
        let store = InMemoryCacheStore::default();
        store.upsert_fee(&entry(9.0)).await.expect("first write");
        store.upsert_fee(&entry(9.5)).await.expect("second write");

        assert_eq!(store.fee_count().await, 1);
        let stored = store
            .get_fee(&entry(0.0).key)
            .await
            .expect("read")
            .expect("present");
        assert_eq!(stored.total_fee, 9.5);
    }
}
