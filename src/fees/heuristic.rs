//! Category and size-tier fee estimates used when no live quote exists.

use crate::measurements::{length_to_inches, round_two, weight_to_pounds};
use crate::models::PackageDimensions;
use serde::Serialize;

const DEFAULT_REFERRAL_RATE: f64 = 0.15;
const MIN_REFERRAL_FEE: f64 = 0.30;

#[derive(Clone, Copy)]
pub struct CategoryFeeBucket {
    id: &'static str,
    label: &'static str,
    referral_rate: f64,
    keywords: &'static [&'static str],
}

static CATEGORY_BUCKETS: [CategoryFeeBucket; 6] = [
    CategoryFeeBucket {
        id: "electronics",
        label: "Consumer Electronics",
        referral_rate: 0.08,
        keywords: &["electronic", "headphone", "camera", "charger", "cable", "speaker"],
    },
    CategoryFeeBucket {
        id: "beauty",
        label: "Beauty & Personal Care",
        referral_rate: 0.08,
        keywords: &[
            "beauty",
            "skin",
            "skincare",
            "cosmetic",
            "makeup",
            "hair",
            "health",
            "supplement",
        ],
    },
    CategoryFeeBucket {
        id: "grocery",
        label: "Grocery & Gourmet",
        referral_rate: 0.08,
        keywords: &["grocery", "food", "snack", "coffee", "tea"],
    },
    CategoryFeeBucket {
        id: "apparel",
        label: "Clothing & Accessories",
        referral_rate: 0.17,
        keywords: &["apparel", "clothing", "shirt", "shoe", "sneaker", "dress", "jeans"],
    },
    CategoryFeeBucket {
        id: "jewelry",
        label: "Jewelry",
        referral_rate: 0.20,
        keywords: &["jewelry", "jewellery", "ring", "necklace", "bracelet", "earring"],
    },
    CategoryFeeBucket {
        id: "home",
        label: "Home & Kitchen",
        referral_rate: 0.15,
        keywords: &[
            "home",
            "kitchen",
            "furniture",
            "decor",
            "cookware",
            "garden",
            "chair",
            "mattress",
            "bedding",
        ],
    },
];

fn match_bucket(hint: Option<&str>) -> Option<&'static CategoryFeeBucket> {
    let normalized = hint?.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    let tokens: Vec<&str> = normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();
    CATEGORY_BUCKETS.iter().find(|bucket| {
        bucket.id == normalized
            || bucket
                .keywords
                .iter()
                .any(|keyword| tokens.iter().any(|token| token_matches(token, keyword)))
    })
}

/// Whole-word match, allowing a trailing plural "s".
fn token_matches(token: &str, keyword: &str) -> bool {
    token == keyword || token.strip_suffix('s') == Some(keyword)
}

pub fn referral_rate(category_hint: Option<&str>) -> f64 {
    match_bucket(category_hint)
        .map(|bucket| bucket.referral_rate)
        .unwrap_or(DEFAULT_REFERRAL_RATE)
}

pub fn category_label(category_hint: Option<&str>) -> Option<&'static str> {
    match_bucket(category_hint).map(|bucket| bucket.label)
}

pub fn category_id(category_hint: Option<&str>) -> Option<&'static str> {
    match_bucket(category_hint).map(|bucket| bucket.id)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SizeTier {
    SmallStandard,
    LargeStandard,
    Oversize,
}

impl SizeTier {
    pub fn fulfillment_fee(&self) -> f64 {
        match self {
            SizeTier::SmallStandard => 3.22,
            SizeTier::LargeStandard => 5.42,
            SizeTier::Oversize => 9.73,
        }
    }

    /// Tier from package dimensions, or `None` when any measure is unusable.
    pub fn from_dimensions(dimensions: &PackageDimensions) -> Option<Self> {
        let mut sides = [
            length_to_inches(&dimensions.length)?,
            length_to_inches(&dimensions.width)?,
            length_to_inches(&dimensions.height)?,
        ];
        let weight = weight_to_pounds(&dimensions.weight)?;
        sides.sort_by(|a, b| b.total_cmp(a));
        let [longest, median, shortest] = sides;

        if weight <= 1.0 && longest <= 15.0 && median <= 12.0 && shortest <= 0.75 {
            Some(SizeTier::SmallStandard)
        } else if weight <= 20.0 && longest <= 18.0 && median <= 14.0 && shortest <= 8.0 {
            Some(SizeTier::LargeStandard)
        } else {
            Some(SizeTier::Oversize)
        }
    }

    pub fn from_price(price: f64) -> Self {
        if price < 15.0 {
            SizeTier::SmallStandard
        } else if price < 100.0 {
            SizeTier::LargeStandard
        } else {
            SizeTier::Oversize
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HeuristicFee {
    pub referral_fee: f64,
    pub referral_rate: f64,
    pub fulfillment_fee: f64,
    pub size_tier: SizeTier,
    pub size_from_dimensions: bool,
    pub total_fee: f64,
}

/// Referral = price × category rate (with a floor), fulfillment from the
/// size tier. Merchant-fulfilled items carry no fulfillment fee.
pub fn estimate_fees(
    price: f64,
    category_hint: Option<&str>,
    dimensions: Option<&PackageDimensions>,
    platform_fulfilled: bool,
) -> HeuristicFee {
    let price = if price.is_finite() { price.max(0.0) } else { 0.0 };
    let rate = referral_rate(category_hint);
    let referral_fee = if price > 0.0 {
        round_two((price * rate).max(MIN_REFERRAL_FEE))
    } else {
        0.0
    };

    let measured = dimensions.and_then(SizeTier::from_dimensions);
    let size_tier = measured.unwrap_or_else(|| SizeTier::from_price(price));
    let fulfillment_fee = if platform_fulfilled {
        size_tier.fulfillment_fee()
    } else {
        0.0
    };

    HeuristicFee {
        referral_fee,
        referral_rate: rate,
        fulfillment_fee,
        size_tier,
        size_from_dimensions: measured.is_some(),
        total_fee: round_two(referral_fee + fulfillment_fee),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Measure;

    fn measure(value: f64, unit: &str) -> Measure {
        Measure {
            value: Some(value),
            unit: Some(unit.to_string()),
        }
    }

    fn dims(l: f64, w: f64, h: f64, unit: &str, weight: f64, weight_unit: &str) -> PackageDimensions {
        PackageDimensions {
            length: measure(l, unit),
            width: measure(w, unit),
            height: measure(h, unit),
            weight: measure(weight, weight_unit),
        }
    }

    #[test]
    fn category_hint_selects_rate() {
        assert_eq!(referral_rate(Some("Wireless Headphones")), 0.08);
        assert_eq!(referral_rate(Some("jewelry")), 0.20);
        assert_eq!(referral_rate(Some("Women's Dress")), 0.17);
        assert_eq!(referral_rate(Some("pet toys")), DEFAULT_REFERRAL_RATE);
        assert_eq!(referral_rate(None), DEFAULT_REFERRAL_RATE);
        assert_eq!(category_label(Some("kitchen knives")), Some("Home & Kitchen"));
    }

    #[test]
    fn category_keywords_match_whole_words() {
        assert_eq!(category_id(Some("office chair")), Some("home"));
        assert_eq!(category_id(Some("spring mattress")), Some("home"));
        assert_eq!(category_id(Some("skinny jeans")), Some("apparel"));
        assert_eq!(category_id(Some("garment steamer")), None);
        assert_eq!(referral_rate(Some("garment steamer")), DEFAULT_REFERRAL_RATE);
        assert_eq!(category_id(Some("green tea")), Some("grocery"));
        assert_eq!(category_id(Some("diamond rings")), Some("jewelry"));
        assert_eq!(category_id(Some("skin-care serum")), Some("beauty"));
    }

    #[test]
    fn dimensions_drive_size_tier() {
        let flat = dims(10.0, 8.0, 0.5, "in", 6.0, "oz");
        assert_eq!(SizeTier::from_dimensions(&flat), Some(SizeTier::SmallStandard));

        let boxed = dims(40.0, 30.0, 15.0, "cm", 2.0, "kg");
        assert_eq!(SizeTier::from_dimensions(&boxed), Some(SizeTier::LargeStandard));

        let bulky = dims(30.0, 20.0, 10.0, "in", 25.0, "lb");
        assert_eq!(SizeTier::from_dimensions(&bulky), Some(SizeTier::Oversize));

        let unknown = dims(10.0, 8.0, 0.5, "parsecs", 1.0, "lb");
        assert_eq!(SizeTier::from_dimensions(&unknown), None);
    }

    #[test]
    fn price_buckets_stand_in_for_missing_dimensions() {
        assert_eq!(SizeTier::from_price(9.99), SizeTier::SmallStandard);
        assert_eq!(SizeTier::from_price(15.0), SizeTier::LargeStandard);
        assert_eq!(SizeTier::from_price(149.0), SizeTier::Oversize);
    }

    #[test]
    fn estimate_combines_referral_and_fulfillment() {
        let fee = estimate_fees(20.0, Some("kitchen"), None, true);
        assert_eq!(fee.referral_fee, 3.0);
        assert_eq!(fee.size_tier, SizeTier::LargeStandard);
        assert!(!fee.size_from_dimensions);
        assert_eq!(fee.total_fee, 8.42);

        let merchant = estimate_fees(20.0, Some("kitchen"), None, false);
        assert_eq!(merchant.fulfillment_fee, 0.0);
        assert_eq!(merchant.total_fee, 3.0);
    }

    #[test]
    fn referral_fee_has_a_floor() {
        let fee = estimate_fees(1.0, Some("electronics"), None, true);
        assert_eq!(fee.referral_fee, MIN_REFERRAL_FEE);
        assert_eq!(fee.size_tier, SizeTier::SmallStandard);
    }
}
