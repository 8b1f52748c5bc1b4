//! Cost-of-goods assumptions, fee selection and margin ranges.
//!
//! [`compute_margin_snapshot`] always returns a snapshot: a missing price
//! degrades to an empty `ESTIMATED` snapshot and an internal fault degrades to
//! a fixed conservative band.

use crate::fees::heuristic::{self, SizeTier};
use crate::measurements::{round_one, round_two};
use crate::models::PackageDimensions;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const FALLBACK_COGS_RANGE: (f64, f64) = (0.40, 0.65);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourcingModel {
    PrivateLabel,
    #[serde(alias = "wholesale_arbitrage")]
    Wholesale,
    RetailArbitrage,
    Dropshipping,
    #[default]
    NotSure,
}

impl SourcingModel {
    /// COGS as a fraction of price.
    fn cogs_fraction(&self) -> (f64, f64) {
        match self {
            SourcingModel::PrivateLabel => (0.20, 0.35),
            SourcingModel::Wholesale => (0.40, 0.60),
            SourcingModel::RetailArbitrage => (0.35, 0.55),
            SourcingModel::Dropshipping => (0.50, 0.70),
            SourcingModel::NotSure => (0.30, 0.50),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SourcingModel::PrivateLabel => "private label",
            SourcingModel::Wholesale => "wholesale",
            SourcingModel::RetailArbitrage => "retail arbitrage",
            SourcingModel::Dropshipping => "dropshipping",
            SourcingModel::NotSure => "unspecified",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SourcingModel::NotSure)
    }
}

/// Shift applied to both ends of the COGS band for categories whose landed
/// cost runs hotter or cooler than average.
fn category_cogs_shift(category_hint: Option<&str>) -> f64 {
    match heuristic::category_id(category_hint) {
        Some("electronics") => 0.05,
        Some("jewelry") => -0.05,
        Some("apparel") | Some("beauty") => -0.03,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    #[default]
    Keyword,
    Asin,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    AsinPrice,
    KeywordAverage,
    Unavailable,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FbaFeeSource {
    LiveQuote,
    CategoryEstimate,
    UserOverride,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    Estimated,
    Refined,
    Exact,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FeeInput {
    pub live_fee: Option<f64>,
    pub dimensions: Option<PackageDimensions>,
    pub platform_fulfilled: Option<bool>,
}

/// User-entered values that replace the engine's own.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CostOverride {
    pub cogs_min: Option<f64>,
    pub cogs_max: Option<f64>,
    pub fee: Option<f64>,
}

impl CostOverride {
    fn is_empty(&self) -> bool {
        self.cogs_min.is_none() && self.cogs_max.is_none() && self.fee.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MarginInput {
    pub mode: MarginMode,
    pub price: Option<f64>,
    pub category_hint: Option<String>,
    pub sourcing_model: SourcingModel,
    pub fee: FeeInput,
    pub cost_override: Option<CostOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarginSnapshot {
    pub assumed_price: Option<f64>,
    pub price_source: PriceSource,
    pub estimated_cogs_min: Option<f64>,
    pub estimated_cogs_max: Option<f64>,
    pub estimated_fba_fee: Option<f64>,
    pub fba_fee_source: FbaFeeSource,
    pub net_margin_min_pct: Option<f64>,
    pub net_margin_max_pct: Option<f64>,
    pub breakeven_price_min: Option<f64>,
    pub breakeven_price_max: Option<f64>,
    pub confidence_tier: ConfidenceTier,
    pub assumptions: Vec<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum MarginError {
    #[error("`{0}` must be a finite, non-negative number")]
    InvalidValue(&'static str),
    #[error("cogs range is inverted: min {min} > max {max}")]
    InvertedRange { min: f64, max: f64 },
}

pub fn compute_margin_snapshot(input: &MarginInput) -> MarginSnapshot {
    let Some(price) = input.price.filter(|p| p.is_finite() && *p > 0.0) else {
        debug!(target: "market.margin", "margin_price_unavailable");
        return price_unavailable_snapshot();
    };
    match try_compute(input, price) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(target: "market.margin", error = %err, price, "margin_fallback_to_defaults");
            conservative_snapshot(price, price_source(input.mode))
        }
    }
}

fn price_source(mode: MarginMode) -> PriceSource {
    match mode {
        MarginMode::Asin => PriceSource::AsinPrice,
        MarginMode::Keyword => PriceSource::KeywordAverage,
    }
}

fn try_compute(input: &MarginInput, price: f64) -> Result<MarginSnapshot, MarginError> {
    let hint = input.category_hint.as_deref();
    let cost_override = input.cost_override.as_ref().filter(|o| !o.is_empty());
    let mut assumptions = Vec::new();

    assumptions.push(match input.mode {
        MarginMode::Asin => format!("Price {price:.2} taken from the selected listing"),
        MarginMode::Keyword => format!("Price {price:.2} taken from the keyword average"),
    });

    let (low, high) = input.sourcing_model.cogs_fraction();
    let shift = category_cogs_shift(hint);
    let low = (low + shift).clamp(0.05, 0.95);
    let high = (high + shift).clamp(low, 0.95);
    let mut cogs_min = price * low;
    let mut cogs_max = price * high;
    assumptions.push(format!(
        "COGS assumed at {:.0}-{:.0}% of price for {} sourcing",
        low * 100.0,
        high * 100.0,
        input.sourcing_model.label()
    ));
    if shift != 0.0
        && let Some(label) = heuristic::category_label(hint)
    {
        assumptions.push(format!(
            "{label} adjusts COGS by {:+.0} points",
            shift * 100.0
        ));
    }

    let live_fee = input
        .fee
        .live_fee
        .filter(|fee| fee.is_finite() && *fee >= 0.0);
    let (mut fee, mut fee_source) = match live_fee {
        Some(fee) => {
            assumptions.push("FBA fee from live platform quote".to_string());
            (fee, FbaFeeSource::LiveQuote)
        }
        None => {
            let estimate = heuristic::estimate_fees(
                price,
                hint,
                input.fee.dimensions.as_ref(),
                input.fee.platform_fulfilled.unwrap_or(true),
            );
            assumptions.push(format!(
                "FBA fee estimated: {:.0}% referral plus {} fulfillment{}",
                estimate.referral_rate * 100.0,
                size_tier_label(estimate.size_tier),
                if estimate.size_from_dimensions {
                    ""
                } else {
                    " (size inferred from price)"
                }
            ));
            (estimate.total_fee, FbaFeeSource::CategoryEstimate)
        }
    };

    let mut cogs_replaced = false;
    if let Some(cost_override) = cost_override {
        let min = cost_override.cogs_min.map(|v| checked(v, "cogs_min")).transpose()?;
        let max = cost_override.cogs_max.map(|v| checked(v, "cogs_max")).transpose()?;
        match (min, max) {
            (Some(min), Some(max)) => {
                if min > max {
                    return Err(MarginError::InvertedRange { min, max });
                }
                cogs_min = min;
                cogs_max = max;
            }
            (Some(single), None) | (None, Some(single)) => {
                cogs_min = single;
                cogs_max = single;
            }
            (None, None) => {}
        }
        if min.is_some() || max.is_some() {
            cogs_replaced = true;
            assumptions.push("COGS replaced by user-provided cost".to_string());
        }
        if let Some(value) = cost_override.fee {
            fee = checked(value, "fee")?;
            fee_source = FbaFeeSource::UserOverride;
            assumptions.push("FBA fee replaced by user-provided fee".to_string());
        }
    }

    let tier = if cogs_replaced {
        ConfidenceTier::Refined
    } else if !input.sourcing_model.is_known() {
        ConfidenceTier::Estimated
    } else if fee_source == FbaFeeSource::LiveQuote {
        ConfidenceTier::Exact
    } else {
        ConfidenceTier::Refined
    };

    Ok(build_snapshot(
        price,
        price_source(input.mode),
        (cogs_min, cogs_max),
        fee,
        fee_source,
        tier,
        assumptions,
    ))
}

fn checked(value: f64, field: &'static str) -> Result<f64, MarginError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(MarginError::InvalidValue(field))
    }
}

fn size_tier_label(tier: SizeTier) -> &'static str {
    match tier {
        SizeTier::SmallStandard => "small standard",
        SizeTier::LargeStandard => "large standard",
        SizeTier::Oversize => "oversize",
    }
}

fn margin_pct(net: f64, price: f64) -> f64 {
    round_one((net / price * 100.0).max(0.0))
}

fn build_snapshot(
    price: f64,
    price_source: PriceSource,
    (cogs_min, cogs_max): (f64, f64),
    fee: f64,
    fba_fee_source: FbaFeeSource,
    confidence_tier: ConfidenceTier,
    assumptions: Vec<String>,
) -> MarginSnapshot {
    let net_min = price - cogs_max - fee;
    let net_max = price - cogs_min - fee;
    MarginSnapshot {
        assumed_price: Some(round_two(price)),
        price_source,
        estimated_cogs_min: Some(round_two(cogs_min)),
        estimated_cogs_max: Some(round_two(cogs_max)),
        estimated_fba_fee: Some(round_two(fee)),
        fba_fee_source,
        net_margin_min_pct: Some(margin_pct(net_min, price)),
        net_margin_max_pct: Some(margin_pct(net_max, price)),
        breakeven_price_min: Some(round_two(cogs_min + fee)),
        breakeven_price_max: Some(round_two(cogs_max + fee)),
        confidence_tier,
        assumptions,
    }
}

fn price_unavailable_snapshot() -> MarginSnapshot {
    MarginSnapshot {
        assumed_price: None,
        price_source: PriceSource::Unavailable,
        estimated_cogs_min: None,
        estimated_cogs_max: None,
        estimated_fba_fee: None,
        fba_fee_source: FbaFeeSource::Unknown,
        net_margin_min_pct: None,
        net_margin_max_pct: None,
        breakeven_price_min: None,
        breakeven_price_max: None,
        confidence_tier: ConfidenceTier::Estimated,
        assumptions: vec!["price unavailable".to_string()],
    }
}

fn conservative_snapshot(price: f64, price_source: PriceSource) -> MarginSnapshot {
    let (low, high) = FALLBACK_COGS_RANGE;
    build_snapshot(
        price,
        price_source,
        (price * low, price * high),
        SizeTier::LargeStandard.fulfillment_fee(),
        FbaFeeSource::CategoryEstimate,
        ConfidenceTier::Estimated,
        vec![
            "Inputs could not be used; conservative defaults applied".to_string(),
            "COGS assumed at 40-65% of price".to_string(),
            "FBA fee assumed at the large standard tier".to_string(),
        ],
    )
}
