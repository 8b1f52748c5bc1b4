use crate::cache::{AnchorKey, CacheStore, Clock, KeyedLocks};
use crate::measurements::round_two;
use crate::models::{KeywordMarketSnapshot, MarketplaceId, ParsedListing};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const RANK_DECAY: f64 = 0.45;
const ORGANIC_SHARE: f64 = 85.0;
const SPONSORED_SHARE: f64 = 15.0;
const DEFAULT_ORGANIC_COUNT: usize = 20;

/// Share of page demand per rank bucket, in percent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RankDistribution {
    pub rank_1: f64,
    pub rank_2_3: f64,
    pub rank_4_10: f64,
    pub rank_11_20: f64,
    pub rank_21_plus: f64,
    pub sponsored: f64,
}

impl RankDistribution {
    pub fn total(&self) -> f64 {
        self.rank_1 + self.rank_2_3 + self.rank_4_10 + self.rank_11_20 + self.rank_21_plus + self.sponsored
    }

    fn bucket_mut(&mut self, rank: usize) -> &mut f64 {
        match rank {
            1 => &mut self.rank_1,
            2..=3 => &mut self.rank_2_3,
            4..=10 => &mut self.rank_4_10,
            11..=20 => &mut self.rank_11_20,
            _ => &mut self.rank_21_plus,
        }
    }
}

/// Organic ranks decay as `exp(-0.45 (r - 1))` and split 85% of demand;
/// sponsored slots share a flat 15%. With no sponsored slots organic takes
/// everything, and an empty page is treated as a full organic page.
pub fn compute_rank_distribution(organic_count: usize, sponsored_count: usize) -> RankDistribution {
    let (organic_count, sponsored_count) = if organic_count == 0 && sponsored_count == 0 {
        (DEFAULT_ORGANIC_COUNT, 0)
    } else {
        (organic_count, sponsored_count)
    };

    let (organic_share, sponsored_share) = match (organic_count, sponsored_count) {
        (0, _) => (0.0, 100.0),
        (_, 0) => (100.0, 0.0),
        _ => (ORGANIC_SHARE, SPONSORED_SHARE),
    };

    let weights: Vec<f64> = (1..=organic_count)
        .map(|rank| (-RANK_DECAY * (rank as f64 - 1.0)).exp())
        .collect();
    let weight_total: f64 = weights.iter().sum();

    let mut distribution = RankDistribution {
        sponsored: sponsored_share,
        ..RankDistribution::default()
    };
    if weight_total > 0.0 {
        for (index, weight) in weights.iter().enumerate() {
            *distribution.bucket_mut(index + 1) += weight / weight_total * organic_share;
        }
    }

    distribution.rank_1 = round_two(distribution.rank_1);
    distribution.rank_2_3 = round_two(distribution.rank_2_3);
    distribution.rank_4_10 = round_two(distribution.rank_4_10);
    distribution.rank_11_20 = round_two(distribution.rank_11_20);
    distribution.rank_21_plus = round_two(distribution.rank_21_plus);
    distribution
}

/// Keyword-level demand estimate, replaced wholesale once it expires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketAnchor {
    pub keyword: String,
    pub marketplace: MarketplaceId,
    pub estimated_market_units: f64,
    pub estimated_market_revenue: f64,
    pub rank_distribution: RankDistribution,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl MarketAnchor {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorInputs {
    pub total_units: f64,
    pub avg_price: f64,
    pub organic_count: usize,
    pub sponsored_count: usize,
}

impl AnchorInputs {
    pub fn from_page(listings: &[ParsedListing], snapshot: &KeywordMarketSnapshot) -> Self {
        let sponsored_count = listings.iter().filter(|listing| listing.sponsored()).count();
        Self {
            total_units: snapshot.target_units(),
            avg_price: snapshot.avg_price,
            organic_count: listings.len() - sponsored_count,
            sponsored_count,
        }
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

pub fn compute_market_anchor(
    key: &AnchorKey,
    inputs: AnchorInputs,
    computed_at: DateTime<Utc>,
    ttl: chrono::Duration,
) -> MarketAnchor {
    let units = non_negative(inputs.total_units);
    let revenue = units * non_negative(inputs.avg_price);
    MarketAnchor {
        keyword: key.keyword.clone(),
        marketplace: key.marketplace,
        estimated_market_units: units.round(),
        estimated_market_revenue: round_two(revenue),
        rank_distribution: compute_rank_distribution(inputs.organic_count, inputs.sponsored_count),
        computed_at,
        expires_at: computed_at + ttl,
    }
}

/// Read-through anchor cache keyed by normalized keyword and marketplace.
pub struct MarketAnchorService {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    inflight: KeyedLocks,
}

impl MarketAnchorService {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, ttl: chrono::Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            inflight: KeyedLocks::default(),
        }
    }

    pub async fn get_or_compute(
        &self,
        keyword: &str,
        marketplace: MarketplaceId,
        inputs: AnchorInputs,
    ) -> MarketAnchor {
        let key = AnchorKey::new(keyword, marketplace);
        if let Some(anchor) = self.fresh(&key).await {
            return anchor;
        }

        let _flight = self.inflight.acquire(&key.storage_key()).await;
        if let Some(anchor) = self.fresh(&key).await {
            return anchor;
        }

        let anchor = compute_market_anchor(&key, inputs, self.clock.now(), self.ttl);
        if let Err(err) = self.store.upsert_anchor(&key, &anchor).await {
            warn!(target: "market.anchor", key = %key.storage_key(), error = %err, "anchor_cache_write_failed");
        }
        info!(
            target: "market.anchor",
            key = %key.storage_key(),
            units = anchor.estimated_market_units,
            revenue = anchor.estimated_market_revenue,
            "anchor_computed"
        );
        anchor
    }

    async fn fresh(&self, key: &AnchorKey) -> Option<MarketAnchor> {
        match self.store.get_anchor(key).await {
            Ok(Some(anchor)) if anchor.is_fresh(self.clock.now()) => {
                debug!(target: "market.anchor", key = %key.storage_key(), "anchor_cache_hit");
                Some(anchor)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(target: "market.anchor", key = %key.storage_key(), error = %err, "anchor_cache_read_failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryCacheStore, ManualClock};
    use chrono::TimeZone;

    #[test]
    fn ten_organic_two_sponsored() {
        let distribution = compute_rank_distribution(10, 2);
        assert_eq!(distribution.sponsored, 15.0);
        assert!((distribution.total() - 100.0).abs() <= 0.1);
        assert_eq!(distribution.rank_11_20, 0.0);
        assert_eq!(distribution.rank_21_plus, 0.0);
        assert!(distribution.rank_1 > distribution.rank_2_3 / 2.0);
    }

    #[test]
    fn organic_takes_all_without_sponsored_slots() {
        let distribution = compute_rank_distribution(25, 0);
        assert_eq!(distribution.sponsored, 0.0);
        assert!((distribution.total() - 100.0).abs() <= 0.1);
        assert!(distribution.rank_21_plus > 0.0);
    }

    #[test]
    fn degenerate_pages_still_sum_to_100() {
        let only_sponsored = compute_rank_distribution(0, 4);
        assert_eq!(only_sponsored.sponsored, 100.0);
        assert_eq!(only_sponsored.rank_1, 0.0);

        let empty = compute_rank_distribution(0, 0);
        assert_eq!(empty, compute_rank_distribution(20, 0));
        assert!((empty.total() - 100.0).abs() <= 0.1);
    }

    #[test]
    fn decay_orders_buckets_per_rank() {
        let distribution = compute_rank_distribution(20, 3);
        let per_rank_top = distribution.rank_1;
        let per_rank_mid = distribution.rank_2_3 / 2.0;
        let per_rank_low = distribution.rank_4_10 / 7.0;
        assert!(per_rank_top > per_rank_mid);
        assert!(per_rank_mid > per_rank_low);
    }

    #[test]
    fn anchor_revenue_is_units_times_price() {
        let at = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        let key = AnchorKey::new("Yoga Mat", MarketplaceId::Us);
        let anchor = compute_market_anchor(
            &key,
            AnchorInputs {
                total_units: 12_000.0,
                avg_price: 24.5,
                organic_count: 18,
                sponsored_count: 2,
            },
            at,
            chrono::Duration::hours(24),
        );
        assert_eq!(anchor.estimated_market_revenue, 294_000.0);
        assert_eq!(anchor.keyword, "yoga mat");
        assert_eq!(anchor.expires_at, at + chrono::Duration::hours(24));
    }

    #[test]
    fn inputs_count_sponsored_listings() {
        let listings = vec![
            ParsedListing {
                is_sponsored: Some(true),
                ..ParsedListing::default()
            },
            ParsedListing::default(),
            ParsedListing::default(),
        ];
        let inputs = AnchorInputs::from_page(&listings, &KeywordMarketSnapshot::default());
        assert_eq!(inputs.organic_count, 2);
        assert_eq!(inputs.sponsored_count, 1);
    }

    #[tokio::test]
    async fn service_reads_through_and_recomputes_after_ttl() {
        let store = Arc::new(InMemoryCacheStore::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap(),
        ));
        let service = MarketAnchorService::new(store, clock.clone(), chrono::Duration::hours(24));
        let inputs = |units| AnchorInputs {
            total_units: units,
            avg_price: 10.0,
            organic_count: 20,
            sponsored_count: 0,
        };

        let first = service.get_or_compute("desk lamp", MarketplaceId::Uk, inputs(500.0)).await;
        let cached = service.get_or_compute(" Desk  Lamp ", MarketplaceId::Uk, inputs(900.0)).await;
        assert_eq!(first, cached);
        assert_eq!(cached.estimated_market_units, 500.0);

        let other_market = service.get_or_compute("desk lamp", MarketplaceId::De, inputs(900.0)).await;
        assert_eq!(other_market.estimated_market_units, 900.0);

        clock.advance(chrono::Duration::hours(24));
        let refreshed = service.get_or_compute("desk lamp", MarketplaceId::Uk, inputs(900.0)).await;
        assert_eq!(refreshed.estimated_market_units, 900.0);
        assert!(refreshed.computed_at > first.computed_at);
    }
}
