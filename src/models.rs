use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// A scraped search-result row. Every field may be missing.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ParsedListing {
    #[serde(default)]
    pub asin: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub reviews: Option<u64>,
    #[serde(default)]
    pub bsr: Option<u64>,
    #[serde(default)]
    pub fulfillment: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub is_sponsored: Option<bool>,
}

impl ParsedListing {
    pub fn sponsored(&self) -> bool {
        self.is_sponsored.unwrap_or(false)
    }
}

/// Keyword-level aggregate the canonical page reconciles to.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct KeywordMarketSnapshot {
    pub avg_price: f64,
    pub avg_rating: f64,
    pub avg_reviews: f64,
    pub est_total_monthly_units_min: f64,
    pub est_total_monthly_units_max: f64,
    pub est_total_monthly_revenue_min: f64,
    pub est_total_monthly_revenue_max: f64,
}

impl KeywordMarketSnapshot {
    pub fn target_units(&self) -> f64 {
        midpoint(
            self.est_total_monthly_units_min,
            self.est_total_monthly_units_max,
        )
    }

    /// Midpoint of the revenue range, or units × average price when the
    /// aggregator left revenue empty.
    pub fn target_revenue(&self) -> f64 {
        let revenue = midpoint(
            self.est_total_monthly_revenue_min,
            self.est_total_monthly_revenue_max,
        );
        if revenue > 0.0 {
            revenue
        } else if self.avg_price.is_finite() && self.avg_price > 0.0 {
            self.target_units() * self.avg_price
        } else {
            0.0
        }
    }
}

fn midpoint(min: f64, max: f64) -> f64 {
    let values: Vec<f64> = [min, max]
        .into_iter()
        .filter(|value| value.is_finite() && *value > 0.0)
        .collect();
    match values.as_slice() {
        [] => 0.0,
        [single] => *single,
        [a, b] => (a + b) / 2.0,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Fulfillment {
    #[serde(rename = "FBA")]
    Fba,
    #[serde(rename = "FBM")]
    Fbm,
    #[serde(rename = "AMZ")]
    Amazon,
}

impl Fulfillment {
    pub fn from_raw(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase();
        match normalized.as_str() {
            "fba" | "prime" | "afn" | "fulfilled by amazon" => Some(Self::Fba),
            "fbm" | "mfn" | "merchant" | "seller" | "fulfilled by merchant" => Some(Self::Fbm),
            "amz" | "amazon" | "amzn" | "sold by amazon" => Some(Self::Amazon),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketplaceId {
    #[default]
    Us,
    Ca,
    Mx,
    #[serde(alias = "GB")]
    Uk,
    De,
    Fr,
    It,
    Es,
    Jp,
}

impl MarketplaceId {
    pub fn code(&self) -> &'static str {
        match self {
            MarketplaceId::Us => "US",
            MarketplaceId::Ca => "CA",
            MarketplaceId::Mx => "MX",
            MarketplaceId::Uk => "UK",
            MarketplaceId::De => "DE",
            MarketplaceId::Fr => "FR",
            MarketplaceId::It => "IT",
            MarketplaceId::Es => "ES",
            MarketplaceId::Jp => "JP",
        }
    }

    pub fn platform_id(&self) -> &'static str {
        match self {
            MarketplaceId::Us => "ATVPDKIKX0DER",
            MarketplaceId::Ca => "A2EUQ1WTGCTBG2",
            MarketplaceId::Mx => "A1AM78C64UM0Y8",
            MarketplaceId::Uk => "A1F83G8C2ARO7P",
            MarketplaceId::De => "A1PA6795UKMFR9",
            MarketplaceId::Fr => "A13V1IB3VIYZZH",
            MarketplaceId::It => "APJ6JRA9NG5V4",
            MarketplaceId::Es => "A1RKKUPIHCS9HS",
            MarketplaceId::Jp => "A1VC38T7YXB528",
        }
    }

    pub fn signing_region(&self) -> &'static str {
        match self {
            MarketplaceId::Us | MarketplaceId::Ca | MarketplaceId::Mx => "us-east-1",
            MarketplaceId::Jp => "us-west-2",
            _ => "eu-west-1",
        }
    }

    pub fn api_host(&self, production: bool) -> &'static str {
        let hosts = match self {
            MarketplaceId::Us | MarketplaceId::Ca | MarketplaceId::Mx => {
                ("sellingpartnerapi-na.amazon.com", "sandbox.sellingpartnerapi-na.amazon.com")
            }
            MarketplaceId::Jp => (
                "sellingpartnerapi-fe.amazon.com",
                "sandbox.sellingpartnerapi-fe.amazon.com",
            ),
            _ => (
                "sellingpartnerapi-eu.amazon.com",
                "sandbox.sellingpartnerapi-eu.amazon.com",
            ),
        };
        if production { hosts.0 } else { hosts.1 }
    }

    pub fn currency(&self) -> &'static str {
        match self {
            MarketplaceId::Us => "USD",
            MarketplaceId::Ca => "CAD",
            MarketplaceId::Mx => "MXN",
            MarketplaceId::Uk => "GBP",
            MarketplaceId::Jp => "JPY",
            _ => "EUR",
        }
    }

    /// Country assumed for sellers with no contrary signal.
    pub fn home_country(&self) -> &'static str {
        match self {
            MarketplaceId::Uk => "GB",
            other => other.code(),
        }
    }
}

/// Field names that were generated rather than observed on a canonical row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InferredField {
    Asin,
    Title,
    Price,
    Rating,
    ReviewCount,
    Fulfillment,
    Brand,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalProduct {
    pub rank: u32,
    pub asin: String,
    pub title: String,
    pub price: f64,
    pub rating: f64,
    pub review_count: u64,
    pub bsr: Option<u64>,
    pub estimated_monthly_units: u64,
    pub estimated_monthly_revenue: f64,
    pub revenue_share_pct: f64,
    pub fulfillment: Fulfillment,
    pub brand: String,
    pub seller_country: String,
    pub snapshot_inferred: bool,
    pub snapshot_inferred_fields: Vec<InferredField>,
}

/// A physical measure as scraped or entered, e.g. `{ value: 12, unit: "cm" }`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Measure {
    pub value: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackageDimensions {
    pub length: Measure,
    pub width: Measure,
    pub height: Measure,
    pub weight: Measure,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_targets_use_range_midpoints() {
        let snapshot = KeywordMarketSnapshot {
            avg_price: 25.0,
            est_total_monthly_units_min: 8_000.0,
            est_total_monthly_units_max: 12_000.0,
            est_total_monthly_revenue_min: 180_000.0,
            est_total_monthly_revenue_max: 220_000.0,
            ..KeywordMarketSnapshot::default()
        };
        assert_eq!(snapshot.target_units(), 10_000.0);
        assert_eq!(snapshot.target_revenue(), 200_000.0);
    }

    #[test]
    fn snapshot_revenue_falls_back_to_units_times_price() {
        let snapshot = KeywordMarketSnapshot {
            avg_price: 20.0,
            est_total_monthly_units_min: 1_000.0,
            ..KeywordMarketSnapshot::default()
        };
        assert_eq!(snapshot.target_units(), 1_000.0);
        assert_eq!(snapshot.target_revenue(), 20_000.0);
    }

    #[test]
    fn fulfillment_parses_common_labels() {
        assert_eq!(Fulfillment::from_raw(" Prime "), Some(Fulfillment::Fba));
        assert_eq!(Fulfillment::from_raw("MFN"), Some(Fulfillment::Fbm));
        assert_eq!(Fulfillment::from_raw("amazon"), Some(Fulfillment::Amazon));
        assert_eq!(Fulfillment::from_raw("drone"), None);
    }

    #[test]
    fn marketplace_routing_by_region() {
        assert_eq!(MarketplaceId::Ca.signing_region(), "us-east-1");
        assert_eq!(MarketplaceId::De.signing_region(), "eu-west-1");
        assert_eq!(MarketplaceId::Jp.signing_region(), "us-west-2");
        assert_eq!(
            MarketplaceId::Uk.api_host(true),
            "sellingpartnerapi-eu.amazon.com"
        );
        assert_eq!(MarketplaceId::Uk.home_country(), "GB");
    }

    #[test]
    fn parsed_listing_accepts_sparse_json() {
        let listing: ParsedListing =
            serde_json::from_str(r#"{"asin":"B000TEST01","is_sponsored":true}"#)
                .expect("sparse listing parses");
        assert!(listing.sponsored());
        assert!(listing.price.is_none());
    }
}
