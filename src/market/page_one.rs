//! Canonical page-one synthesis.
//!
//! Real organic listings fill the top ranks as observed; anything missing is
//! generated from the keyword snapshot. Revenue is then normalized so the
//! page reconciles to the snapshot's target total, shares are computed and a
//! final pass drops BSR values that repeat suspiciously often.

use crate::cache::normalize_keyword;
use crate::measurements::{round_one, round_two};
use crate::models::{
    CanonicalProduct, Fulfillment, InferredField, KeywordMarketSnapshot, MarketplaceId,
    ParsedListing,
};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, info};

pub const PAGE_SIZE: usize = 20;

const UNIT_WEIGHT_EXPONENT: f64 = 1.35;
const BSR_DUPLICATE_THRESHOLD: usize = 8;
const PLATFORM_FULFILLED_MAX_RANK: u32 = 5;
const MIN_SYNTHETIC_REVIEWS: f64 = 10.0;
const FALLBACK_RATING: f64 = 4.0;
const ASIN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ0123456789";

const CHINA_BRAND_TOKENS: &[&str] = &[
    "shenzhen", "guangzhou", "dongguan", "yiwu", "zhejiang", "ningbo", "xiamen", "hangzhou",
    "foshan", "shantou",
];

struct RankTier {
    first: u32,
    last: u32,
    price_high: f64,
    price_low: f64,
    rating_adjust: f64,
    review_multiplier: f64,
}

static RANK_TIERS: [RankTier; 4] = [
    RankTier {
        first: 1,
        last: 3,
        price_high: 1.17,
        price_low: 1.10,
        rating_adjust: 0.15,
        review_multiplier: 1.5,
    },
    RankTier {
        first: 4,
        last: 7,
        price_high: 1.08,
        price_low: 1.00,
        rating_adjust: 0.05,
        review_multiplier: 1.1,
    },
    RankTier {
        first: 8,
        last: 12,
        price_high: 0.98,
        price_low: 0.90,
        rating_adjust: -0.05,
        review_multiplier: 0.85,
    },
    RankTier {
        first: 13,
        last: 20,
        price_high: 0.89,
        price_low: 0.80,
        rating_adjust: -0.15,
        review_multiplier: 0.6,
    },
];

fn tier_for(rank: u32) -> &'static RankTier {
    RANK_TIERS
        .iter()
        .find(|tier| rank >= tier.first && rank <= tier.last)
        .unwrap_or(&RANK_TIERS[RANK_TIERS.len() - 1])
}

/// Price multiplier for a rank, interpolated linearly inside its tier.
pub fn price_multiplier(rank: u32) -> f64 {
    let tier = tier_for(rank);
    let span = (tier.last - tier.first) as f64;
    let position = if span > 0.0 {
        (rank.clamp(tier.first, tier.last) - tier.first) as f64 / span
    } else {
        0.0
    };
    tier.price_high + (tier.price_low - tier.price_high) * position
}

/// Share of page units for each rank: `(21 - r)^1.35`, normalized.
pub fn unit_weights(page_size: usize) -> Vec<f64> {
    let raw: Vec<f64> = (1..=page_size)
        .map(|rank| ((page_size + 1 - rank) as f64).powf(UNIT_WEIGHT_EXPONENT))
        .collect();
    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return vec![0.0; page_size];
    }
    raw.into_iter().map(|weight| weight / total).collect()
}

/// Stable seed for a keyword on a marketplace, so repeated builds of one page
/// produce the same filler.
pub fn page_seed(keyword: &str, marketplace: MarketplaceId) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalize_keyword(keyword).hash(&mut hasher);
    marketplace.code().hash(&mut hasher);
    hasher.finish()
}

pub fn infer_seller_country(brand: &str, marketplace: MarketplaceId) -> String {
    let normalized = brand.to_lowercase();
    if CHINA_BRAND_TOKENS
        .iter()
        .any(|token| normalized.contains(token))
    {
        "CN".to_string()
    } else {
        marketplace.home_country().to_string()
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn mean<I: Iterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Averages the synthetic rows are generated around. Snapshot values win;
/// observed listings fill in when the aggregate is empty.
struct Baseline {
    price: f64,
    rating: f64,
    reviews: f64,
}

impl Baseline {
    fn new(snapshot: &KeywordMarketSnapshot, real: &[&ParsedListing]) -> Self {
        let price = positive(Some(snapshot.avg_price))
            .or_else(|| mean(real.iter().filter_map(|l| positive(l.price))))
            .unwrap_or(0.0);
        let rating = positive(Some(snapshot.avg_rating))
            .or_else(|| mean(real.iter().filter_map(|l| positive(l.rating))))
            .unwrap_or(FALLBACK_RATING);
        let reviews = positive(Some(snapshot.avg_reviews))
            .or_else(|| mean(real.iter().filter_map(|l| l.reviews.map(|r| r as f64))))
            .unwrap_or(0.0);
        Self {
            price,
            rating,
            reviews,
        }
    }
}

struct Draft {
    product: CanonicalProduct,
    units: f64,
    revenue: f64,
}

struct RowGenerator {
    baseline: Baseline,
    keyword: String,
    marketplace: MarketplaceId,
    rng: SmallRng,
}

impl RowGenerator {
    fn price(&self, rank: u32) -> f64 {
        round_two(self.baseline.price * price_multiplier(rank))
    }

    fn rating(&mut self, rank: u32) -> f64 {
        let jitter = self.rng.random_range(-0.1..=0.1);
        round_one((self.baseline.rating + tier_for(rank).rating_adjust + jitter).clamp(3.0, 5.0))
    }

    fn reviews(&mut self, rank: u32, rating: f64) -> u64 {
        let boost = if rating >= 4.5 {
            1.2
        } else if rating >= 4.0 {
            1.0
        } else {
            0.8
        };
        let jitter = self.rng.random_range(0.7..=1.3);
        (self.baseline.reviews * tier_for(rank).review_multiplier * boost * jitter)
            .max(MIN_SYNTHETIC_REVIEWS)
            .round() as u64
    }

    fn asin(&mut self) -> String {
        let suffix: String = (0..8)
            .map(|_| ASIN_ALPHABET[self.rng.random_range(0..ASIN_ALPHABET.len())] as char)
            .collect();
        format!("B0{suffix}")
    }

    fn title(&self, rank: u32) -> String {
        format!("{} (page-one estimate #{rank})", self.keyword)
    }

    fn row(&mut self, rank: u32, listing: Option<&ParsedListing>) -> CanonicalProduct {
        let mut inferred = Vec::new();
        let observed = listing.cloned().unwrap_or_default();

        let asin = match non_blank(observed.asin.as_ref()) {
            Some(asin) => asin,
            None => {
                inferred.push(InferredField::Asin);
                self.asin()
            }
        };
        let title = match non_blank(observed.title.as_ref()) {
            Some(title) => title,
            None => {
                inferred.push(InferredField::Title);
                self.title(rank)
            }
        };
        let price = match positive(observed.price) {
            Some(price) => round_two(price),
            None => {
                inferred.push(InferredField::Price);
                self.price(rank)
            }
        };
        let rating = match observed.rating.filter(|r| r.is_finite() && *r > 0.0 && *r <= 5.0) {
            Some(rating) => rating,
            None => {
                inferred.push(InferredField::Rating);
                self.rating(rank)
            }
        };
        let review_count = match observed.reviews {
            Some(reviews) => reviews,
            None => {
                inferred.push(InferredField::ReviewCount);
                self.reviews(rank, rating)
            }
        };
        let fulfillment = match observed.fulfillment.as_deref().and_then(Fulfillment::from_raw) {
            Some(fulfillment) => fulfillment,
            None => {
                inferred.push(InferredField::Fulfillment);
                if rank <= PLATFORM_FULFILLED_MAX_RANK {
                    Fulfillment::Fba
                } else {
                    Fulfillment::Fbm
                }
            }
        };
        let brand = match non_blank(observed.brand.as_ref()) {
            Some(brand) => brand,
            None => {
                inferred.push(InferredField::Brand);
                "Generic".to_string()
            }
        };
        let seller_country = infer_seller_country(&brand, self.marketplace);

        CanonicalProduct {
            rank,
            asin,
            title,
            price,
            rating,
            review_count,
            bsr: observed.bsr,
            estimated_monthly_units: 0,
            estimated_monthly_revenue: 0.0,
            revenue_share_pct: 0.0,
            fulfillment,
            brand,
            seller_country,
            snapshot_inferred: !inferred.is_empty(),
            snapshot_inferred_fields: inferred,
        }
    }
}

/// Builds exactly [`PAGE_SIZE`] ranked products. `seed` overrides the
/// keyword-derived seed used for cosmetic jitter.
pub fn build_page_one(
    listings: &[ParsedListing],
    snapshot: &KeywordMarketSnapshot,
    keyword: &str,
    marketplace: MarketplaceId,
    seed: Option<u64>,
) -> Vec<CanonicalProduct> {
    let real: Vec<&ParsedListing> = listings
        .iter()
        .filter(|listing| !listing.sponsored())
        .take(PAGE_SIZE)
        .collect();
    let seed = seed.unwrap_or_else(|| page_seed(keyword, marketplace));
    let mut generator = RowGenerator {
        baseline: Baseline::new(snapshot, &real),
        keyword: normalize_keyword(keyword),
        marketplace,
        rng: SmallRng::seed_from_u64(seed),
    };

    let target_units = snapshot.target_units();
    let weights = unit_weights(PAGE_SIZE);
    let mut drafts: Vec<Draft> = weights
        .iter()
        .enumerate()
        .map(|(index, weight)| {
            let rank = index as u32 + 1;
            let product = generator.row(rank, real.get(index).copied());
            let units = target_units * weight;
            Draft {
                revenue: units * product.price,
                units,
                product,
            }
        })
        .collect();

    normalize_revenue(&mut drafts, snapshot.target_revenue(), &weights);
    let mut products = finalize(drafts);
    let nullified = nullify_repeated_bsr(&mut products);

    info!(
        target: "market.page_one",
        keyword = %keyword,
        marketplace = marketplace.code(),
        real_rows = real.len(),
        synthetic_rows = PAGE_SIZE - real.len(),
        bsr_nullified = nullified,
        "page_one_built"
    );
    products
}

/// Scales every row so revenue sums to `target`, then recomputes units from
/// price so the two stay consistent.
fn normalize_revenue(drafts: &mut [Draft], target: f64, weights: &[f64]) {
    if !(target.is_finite() && target > 0.0) {
        return;
    }
    let current: f64 = drafts.iter().map(|draft| draft.revenue).sum();
    if current > 0.0 {
        let ratio = target / current;
        debug!(target: "market.page_one", ratio, "revenue_normalized");
        for draft in drafts.iter_mut() {
            draft.revenue *= ratio;
            if draft.product.price > 0.0 {
                draft.units = draft.revenue / draft.product.price;
            }
        }
    } else {
        // No usable prices anywhere: split the target by rank weight alone.
        for (draft, weight) in drafts.iter_mut().zip(weights) {
            draft.revenue = target * weight;
        }
    }
}

fn finalize(drafts: Vec<Draft>) -> Vec<CanonicalProduct> {
    let total: f64 = drafts.iter().map(|draft| draft.revenue).sum();
    let count = drafts.len().max(1) as f64;
    drafts
        .into_iter()
        .map(|draft| {
            let mut product = draft.product;
            product.estimated_monthly_revenue = round_two(draft.revenue);
            product.estimated_monthly_units = draft.units.max(0.0).round() as u64;
            product.revenue_share_pct = if total > 0.0 {
                round_two(draft.revenue / total * 100.0)
            } else {
                round_two(100.0 / count)
            };
            product
        })
        .collect()
}

/// Clears any BSR shared by [`BSR_DUPLICATE_THRESHOLD`] or more rows. Returns
/// how many rows were touched.
fn nullify_repeated_bsr(products: &mut [CanonicalProduct]) -> usize {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for bsr in products.iter().filter_map(|product| product.bsr) {
        *counts.entry(bsr).or_default() += 1;
    }
    let mut nullified = 0;
    for product in products.iter_mut() {
        if let Some(bsr) = product.bsr
            && counts.get(&bsr).copied().unwrap_or(0) >= BSR_DUPLICATE_THRESHOLD
        {
            product.bsr = None;
            nullified += 1;
        }
    }
    nullified
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> KeywordMarketSnapshot {
        KeywordMarketSnapshot {
            avg_price: 25.0,
            avg_rating: 4.3,
            avg_reviews: 1_200.0,
            est_total_monthly_units_min: 8_000.0,
            est_total_monthly_units_max: 12_000.0,
            est_total_monthly_revenue_min: 180_000.0,
            est_total_monthly_revenue_max: 220_000.0,
        }
    }

    fn listing(index: usize) -> ParsedListing {
        ParsedListing {
            asin: Some(format!("B0REAL{index:04}")),
            title: Some(format!("Real product {index}")),
            price: Some(19.99 + index as f64),
            rating: Some(4.4),
            reviews: Some(300 + index as u64),
            bsr: Some(1_000 + index as u64),
            fulfillment: Some("FBA".into()),
            brand: Some("Acme".into()),
            is_sponsored: Some(false),
        }
    }

    #[test]
    fn always_returns_twenty_contiguous_ranks() {
        for real_count in [0usize, 1, 7, 20, 26] {
            let listings: Vec<ParsedListing> = (0..real_count).map(listing).collect();
            let page = build_page_one(&listings, &snapshot(), "yoga mat", MarketplaceId::Us, Some(7));
            assert_eq!(page.len(), PAGE_SIZE);
            let ranks: Vec<u32> = page.iter().map(|p| p.rank).collect();
            assert_eq!(ranks, (1..=20).collect::<Vec<u32>>());
        }
    }

    #[test]
    fn revenue_reconciles_to_snapshot_target() {
        for real_count in [0usize, 5, 20] {
            let listings: Vec<ParsedListing> = (0..real_count).map(listing).collect();
            let page = build_page_one(&listings, &snapshot(), "yoga mat", MarketplaceId::Us, Some(3));
            let revenue: f64 = page.iter().map(|p| p.estimated_monthly_revenue).sum();
            assert!((revenue - 200_000.0).abs() / 200_000.0 < 0.01, "revenue {revenue}");

            let share: f64 = page.iter().map(|p| p.revenue_share_pct).sum();
            assert!((share - 100.0).abs() <= 0.5, "share {share}");
        }
    }

    #[test]
    fn units_follow_price_after_normalization() {
        let page = build_page_one(&[], &snapshot(), "yoga mat", MarketplaceId::Us, Some(11));
        for product in &page {
            let implied = product.estimated_monthly_revenue / product.price;
            assert!((implied - product.estimated_monthly_units as f64).abs() <= 1.0);
        }
        assert!(page[0].estimated_monthly_units > page[19].estimated_monthly_units);
    }

    #[test]
    fn price_curve_is_non_increasing() {
        let multipliers: Vec<f64> = (1..=20).map(price_multiplier).collect();
        assert!((multipliers[0] - 1.17).abs() < 1e-9);
        assert!((multipliers[19] - 0.80).abs() < 1e-9);
        assert!(multipliers.windows(2).all(|pair| pair[0] >= pair[1]));

        let page = build_page_one(&[], &snapshot(), "desk lamp", MarketplaceId::Us, Some(1));
        assert!(page[0].price >= page[19].price);
        assert_eq!(page[0].price, 29.25);
        assert_eq!(page[19].price, 20.0);
    }

    #[test]
    fn repeated_bsr_is_nullified_on_every_carrier() {
        let listings: Vec<ParsedListing> = (0..20)
            .map(|index| {
                let mut row = listing(index);
                if index < 8 {
                    row.bsr = Some(4_242);
                }
                row
            })
            .collect();
        let page = build_page_one(&listings, &snapshot(), "usb hub", MarketplaceId::Us, Some(5));
        assert!(page[..8].iter().all(|p| p.bsr.is_none()));
        for (index, product) in page[8..].iter().enumerate() {
            assert_eq!(product.bsr, Some(1_000 + (index + 8) as u64));
        }
    }

    #[test]
    fn seven_repeats_are_left_alone() {
        let mut products = build_page_one(&[], &snapshot(), "usb hub", MarketplaceId::Us, Some(5));
        for product in products.iter_mut().take(7) {
            product.bsr = Some(77);
        }
        assert_eq!(nullify_repeated_bsr(&mut products), 0);
        assert_eq!(products[0].bsr, Some(77));
    }

    #[test]
    fn synthetic_rows_mark_every_field_inferred() {
        let page = build_page_one(&[listing(0)], &snapshot(), "yoga mat", MarketplaceId::De, Some(9));
        assert!(!page[0].snapshot_inferred);
        assert_eq!(page[0].asin, "B0REAL0000");
        assert_eq!(page[0].price, 19.99);

        let synthetic = &page[1];
        assert!(synthetic.snapshot_inferred);
        assert_eq!(synthetic.snapshot_inferred_fields.len(), 7);
        assert!(synthetic.asin.starts_with("B0") && synthetic.asin.len() == 10);
        assert_eq!(synthetic.seller_country, "DE");
        assert!(synthetic.bsr.is_none());
    }

    #[test]
    fn partial_rows_record_only_missing_fields() {
        let partial = ParsedListing {
            asin: Some("B0PARTIAL1".into()),
            price: Some(30.0),
            ..ParsedListing::default()
        };
        let page = build_page_one(&[partial], &snapshot(), "yoga mat", MarketplaceId::Us, Some(2));
        let fields = &page[0].snapshot_inferred_fields;
        assert!(!fields.contains(&InferredField::Asin));
        assert!(!fields.contains(&InferredField::Price));
        assert!(fields.contains(&InferredField::Title));
        assert!(fields.contains(&InferredField::Rating));
        assert_eq!(page[0].fulfillment, Fulfillment::Fba);
    }

    #[test]
    fn zero_rating_is_treated_as_missing() {
        let unrated = ParsedListing {
            rating: Some(0.0),
            ..listing(1)
        };
        let page = build_page_one(&[unrated], &snapshot(), "yoga mat", MarketplaceId::Us, Some(6));
        assert!(page[0].snapshot_inferred_fields.contains(&InferredField::Rating));
        assert!((3.0..=5.0).contains(&page[0].rating));
    }

    #[test]
    fn sponsored_listings_are_skipped() {
        let mut sponsored = listing(99);
        sponsored.is_sponsored = Some(true);
        let page = build_page_one(&[sponsored, listing(1)], &snapshot(), "yoga mat", MarketplaceId::Us, Some(4));
        assert_eq!(page[0].asin, "B0REAL0001");
        assert!(page.iter().all(|p| p.asin != "B0REAL0099"));
    }

    #[test]
    fn synthetic_fields_stay_in_bounds() {
        let page = build_page_one(&[], &snapshot(), "garlic press", MarketplaceId::Us, None);
        for product in &page {
            assert!((3.0..=5.0).contains(&product.rating));
            assert!(product.review_count >= 10);
            let expected = if product.rank <= 5 { Fulfillment::Fba } else { Fulfillment::Fbm };
            assert_eq!(product.fulfillment, expected);
        }
    }

    #[test]
    fn same_seed_same_page() {
        let a = build_page_one(&[], &snapshot(), "Garlic Press", MarketplaceId::Us, None);
        let b = build_page_one(&[], &snapshot(), "  garlic   press", MarketplaceId::Us, None);
        assert_eq!(a, b);
        let c = build_page_one(&[], &snapshot(), "garlic press", MarketplaceId::Uk, None);
        assert_ne!(
            a.iter().map(|p| p.asin.clone()).collect::<Vec<_>>(),
            c.iter().map(|p| p.asin.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn empty_snapshot_splits_shares_evenly() {
        let page = build_page_one(&[], &KeywordMarketSnapshot::default(), "mystery", MarketplaceId::Us, Some(1));
        assert!(page.iter().all(|p| p.estimated_monthly_revenue == 0.0));
        assert!(page.iter().all(|p| p.revenue_share_pct == 5.0));
    }

    #[test]
    fn china_tokens_set_seller_country() {
        assert_eq!(infer_seller_country("Shenzhen Lighting Co", MarketplaceId::Us), "CN");
        assert_eq!(infer_seller_country("Acme", MarketplaceId::Uk), "GB");
    }
}
