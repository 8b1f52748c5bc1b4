//! Fee waterfall: cache → live quote → (caller-side) heuristic.
//!
//! `resolve_fees` never fails. Every backend or transport problem is logged
//! and reported as [`FeeSource::Unavailable`], leaving the caller to fall
//! back to [`heuristic::estimate_fees`].

pub mod heuristic;

use crate::cache::{CacheStore, Clock, FeeCacheEntry, FeeCacheKey, KeyedLocks};
use crate::measurements::round_two;
use crate::metrics;
use crate::models::MarketplaceId;
use crate::spapi::{FeeQuoteRequest, FeeQuoteSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeeSource {
    Cache,
    Live,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolvedFee {
    pub fulfillment_fee: f64,
    pub referral_fee: f64,
    pub total_fee: f64,
    pub currency: String,
    pub fetched_at: DateTime<Utc>,
}

impl From<&FeeCacheEntry> for ResolvedFee {
    fn from(entry: &FeeCacheEntry) -> Self {
        Self {
            fulfillment_fee: entry.fulfillment_fee,
            referral_fee: entry.referral_fee,
            total_fee: entry.total_fee,
            currency: entry.currency.clone(),
            fetched_at: entry.fetched_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeeResolution {
    pub fee: Option<ResolvedFee>,
    pub source: FeeSource,
}

impl FeeResolution {
    pub fn unavailable() -> Self {
        Self {
            fee: None,
            source: FeeSource::Unavailable,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeLookup {
    pub asin: String,
    pub price: f64,
    #[serde(default)]
    pub marketplace: MarketplaceId,
    #[serde(default = "default_platform_fulfilled")]
    pub platform_fulfilled: bool,
}

fn default_platform_fulfilled() -> bool {
    true
}

pub struct FeeResolutionService {
    store: Arc<dyn CacheStore>,
    source: Option<Arc<dyn FeeQuoteSource>>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    lookup_timeout: Duration,
    inflight: KeyedLocks,
}

impl FeeResolutionService {
    /// `source: None` means live lookups are not configured; every miss then
    /// resolves to `Unavailable`.
    pub fn new(
        store: Arc<dyn CacheStore>,
        source: Option<Arc<dyn FeeQuoteSource>>,
        clock: Arc<dyn Clock>,
        ttl: chrono::Duration,
        lookup_timeout: Duration,
    ) -> Self {
        if source.is_none() {
            info!(target: "market.fees", "live_fee_source_disabled");
        }
        Self {
            store,
            source,
            clock,
            ttl,
            lookup_timeout,
            inflight: KeyedLocks::default(),
        }
    }

    pub async fn resolve_fees(
        &self,
        asin: &str,
        price: f64,
        marketplace: MarketplaceId,
        platform_fulfilled: bool,
    ) -> FeeResolution {
        if asin.trim().is_empty() || !price.is_finite() || price <= 0.0 {
            debug!(target: "market.fees", asin = %asin, price, "fee_lookup_skipped_invalid_input");
            metrics::fee_lookup("invalid");
            return FeeResolution::unavailable();
        }
        let key = FeeCacheKey::new(asin, price, marketplace, platform_fulfilled);

        if let Some(hit) = self.cached(&key).await {
            return hit;
        }

        let Some(source) = self.source.as_ref() else {
            metrics::fee_lookup("unconfigured");
            return FeeResolution::unavailable();
        };

        let storage_key = key.storage_key();
        let _flight = self.inflight.acquire(&storage_key).await;
        if let Some(hit) = self.cached(&key).await {
            return hit;
        }

        let request = FeeQuoteRequest {
            asin: key.asin.clone(),
            price,
            marketplace,
            platform_fulfilled,
        };
        let quote = match source.fetch_quote(&request).await {
            Ok(Some(quote)) => quote,
            Ok(None) => {
                info!(target: "market.fees", key = %storage_key, "live_fee_unavailable");
                metrics::fee_lookup("no_quote");
                return FeeResolution::unavailable();
            }
            Err(err) => {
                warn!(target: "market.fees", key = %storage_key, error = %err, "live_fee_failed");
                metrics::fee_lookup("error");
                return FeeResolution::unavailable();
            }
        };

        let (Some(fulfillment_fee), Some(referral_fee)) = (quote.fulfillment_fee, quote.referral_fee)
        else {
            info!(
                target: "market.fees",
                key = %storage_key,
                has_fulfillment = quote.fulfillment_fee.is_some(),
                has_referral = quote.referral_fee.is_some(),
                "partial_fee_quote_discarded"
            );
            metrics::fee_lookup("partial");
            return FeeResolution::unavailable();
        };

        let fetched_at = self.clock.now();
        let entry = FeeCacheEntry {
            key,
            fulfillment_fee,
            referral_fee,
            total_fee: round_two(fulfillment_fee + referral_fee),
            currency: quote.currency,
            fetched_at,
            expires_at: fetched_at + self.ttl,
        };
        if !entry.is_usable() {
            warn!(target: "market.fees", key = %storage_key, "live_fee_out_of_range");
            metrics::fee_lookup("partial");
            return FeeResolution::unavailable();
        }
        if let Err(err) = self.store.upsert_fee(&entry).await {
            warn!(target: "market.fees", key = %storage_key, error = %err, "fee_cache_write_failed");
        }
        metrics::fee_lookup("live");
        FeeResolution {
            fee: Some(ResolvedFee::from(&entry)),
            source: FeeSource::Live,
        }
    }

    async fn cached(&self, key: &FeeCacheKey) -> Option<FeeResolution> {
        let entry = match self.store.get_fee(key).await {
            Ok(entry) => entry?,
            Err(err) => {
                warn!(target: "market.fees", key = %key.storage_key(), error = %err, "fee_cache_read_failed");
                return None;
            }
        };
        if !entry.is_usable() || !entry.is_fresh(self.clock.now()) {
            debug!(target: "market.fees", key = %key.storage_key(), "fee_cache_stale");
            return None;
        }
        debug!(target: "market.fees", key = %key.storage_key(), "fee_cache_hit");
        metrics::fee_lookup("cache");
        Some(FeeResolution {
            fee: Some(ResolvedFee::from(&entry)),
            source: FeeSource::Cache,
        })
    }

    /// [`resolve_fees`](Self::resolve_fees) bounded by the lookup timeout. A
    /// timed-out lookup is reported as `Unavailable`.
    pub async fn resolve_bounded(&self, lookup: &FeeLookup) -> FeeResolution {
        tokio::time::timeout(
            self.lookup_timeout,
            self.resolve_fees(
                &lookup.asin,
                lookup.price,
                lookup.marketplace,
                lookup.platform_fulfilled,
            ),
        )
        .await
        .unwrap_or_else(|_| {
            warn!(target: "market.fees", asin = %lookup.asin, "fee_lookup_timed_out");
            metrics::fee_lookup("timeout");
            FeeResolution::unavailable()
        })
    }

    /// Resolves lookups concurrently, each bounded as in
    /// [`resolve_bounded`](Self::resolve_bounded). Results come back in input
    /// order.
    pub async fn resolve_batch(self: &Arc<Self>, lookups: Vec<FeeLookup>) -> Vec<FeeResolution> {
        let total = lookups.len();
        let mut set = JoinSet::new();
        for (index, lookup) in lookups.into_iter().enumerate() {
            let service = Arc::clone(self);
            set.spawn(async move { (index, service.resolve_bounded(&lookup).await) });
        }

        let mut results = vec![FeeResolution::unavailable(); total];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, resolution)) => results[index] = resolution,
                Err(err) => warn!(target: "market.fees", error = %err, "fee_lookup_task_failed"),
            }
        }
        results
    }
}
