use crate::error::ServiceError;
use crate::fees::heuristic::{self, HeuristicFee};
use crate::fees::{FeeLookup, FeeResolution, FeeResolutionService};
use crate::margin::{MarginInput, MarginSnapshot, compute_margin_snapshot};
use crate::market::{AnchorInputs, MarketAnchor, MarketAnchorService, build_page_one};
use crate::metrics;
use crate::models::{
    CanonicalProduct, KeywordMarketSnapshot, MarketplaceId, PackageDimensions, ParsedListing,
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{sync::Arc, time::Instant};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

const MAX_BATCH_LOOKUPS: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub fees: Arc<FeeResolutionService>,
    pub anchors: Arc<MarketAnchorService>,
    pub prometheus_handle: Option<PrometheusHandle>,
    pub metrics_key: Option<String>,
}

pub fn router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/market/page-one", post(page_one))
        .route("/fees/resolve", post(resolve_fee))
        .route("/fees/resolve-batch", post(resolve_fee_batch))
        .route("/margin", post(margin))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "market-core-rs",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = state.metrics_key.as_deref() {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    let body = state
        .prometheus_handle
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct PageOneRequest {
    pub keyword: String,
    #[serde(default)]
    pub marketplace: MarketplaceId,
    #[serde(default)]
    pub listings: Vec<ParsedListing>,
    #[serde(default)]
    pub snapshot: KeywordMarketSnapshot,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PageOneResponse {
    pub products: Vec<CanonicalProduct>,
    pub anchor: MarketAnchor,
}

/// Canonical page one for a keyword plus its market anchor.
///
/// - Method: `POST`
/// - Path: `/market/page-one`
async fn page_one(
    State(state): State<AppState>,
    Json(payload): Json<PageOneRequest>,
) -> Result<Json<PageOneResponse>, ServiceError> {
    metrics::inc_requests("/market/page-one");
    let started = Instant::now();
    if payload.keyword.trim().is_empty() {
        return Err(ServiceError::invalid_input("page_one", "keyword is required"));
    }

    let anchor = state
        .anchors
        .get_or_compute(
            &payload.keyword,
            payload.marketplace,
            AnchorInputs::from_page(&payload.listings, &payload.snapshot),
        )
        .await;
    let products = build_page_one(
        &payload.listings,
        &payload.snapshot,
        &payload.keyword,
        payload.marketplace,
        payload.seed,
    );
    metrics::stage_elapsed("page_one", started.elapsed().as_millis());
    Ok(Json(PageOneResponse { products, anchor }))
}

#[derive(Debug, Deserialize)]
pub struct FeeResolveRequest {
    #[serde(flatten)]
    pub lookup: FeeLookup,
    #[serde(default)]
    pub category_hint: Option<String>,
    #[serde(default)]
    pub dimensions: Option<PackageDimensions>,
}

#[derive(Debug, Serialize)]
pub struct FeeResolveResponse {
    #[serde(flatten)]
    pub resolution: FeeResolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate: Option<HeuristicFee>,
}

fn validate_lookup(lookup: &FeeLookup) -> Result<(), ServiceError> {
    if lookup.asin.trim().is_empty() {
        return Err(ServiceError::invalid_input("fees", "asin is required"));
    }
    if !lookup.price.is_finite() || lookup.price <= 0.0 {
        return Err(ServiceError::invalid_input("fees", "price must be positive"));
    }
    Ok(())
}

/// Resolve one fee through the waterfall. When no quote is available the
/// category estimate is returned alongside.
///
/// - Method: `POST`
/// - Path: `/fees/resolve`
async fn resolve_fee(
    State(state): State<AppState>,
    Json(payload): Json<FeeResolveRequest>,
) -> Result<Json<FeeResolveResponse>, ServiceError> {
    metrics::inc_requests("/fees/resolve");
    validate_lookup(&payload.lookup)?;
    let started = Instant::now();

    let resolution = state.fees.resolve_bounded(&payload.lookup).await;
    let estimate = resolution.fee.is_none().then(|| {
        heuristic::estimate_fees(
            payload.lookup.price,
            payload.category_hint.as_deref(),
            payload.dimensions.as_ref(),
            payload.lookup.platform_fulfilled,
        )
    });
    metrics::stage_elapsed("fee_resolve", started.elapsed().as_millis());
    Ok(Json(FeeResolveResponse {
        resolution,
        estimate,
    }))
}

async fn resolve_fee_batch(
    State(state): State<AppState>,
    Json(payload): Json<Vec<FeeLookup>>,
) -> Result<Json<Vec<FeeResolution>>, ServiceError> {
    metrics::inc_requests("/fees/resolve-batch");
    if payload.len() > MAX_BATCH_LOOKUPS {
        return Err(ServiceError::invalid_input(
            "fees_batch",
            format!("at most {MAX_BATCH_LOOKUPS} lookups per request"),
        ));
    }
    Ok(Json(state.fees.resolve_batch(payload).await))
}

#[derive(Debug, Deserialize)]
pub struct MarginRequest {
    #[serde(flatten)]
    pub input: MarginInput,
    #[serde(default)]
    pub asin: Option<String>,
    #[serde(default)]
    pub marketplace: MarketplaceId,
}

/// Margin snapshot. With an `asin` and no caller-supplied fee, a live quote
/// is attempted first.
///
/// - Method: `POST`
/// - Path: `/margin`
async fn margin(
    State(state): State<AppState>,
    Json(payload): Json<MarginRequest>,
) -> Json<MarginSnapshot> {
    metrics::inc_requests("/margin");
    let MarginRequest {
        mut input,
        asin,
        marketplace,
    } = payload;

    if input.fee.live_fee.is_none()
        && let Some(asin) = asin.filter(|value| !value.trim().is_empty())
        && let Some(price) = input.price.filter(|p| p.is_finite() && *p > 0.0)
    {
        let lookup = FeeLookup {
            asin,
            price,
            marketplace,
            platform_fulfilled: input.fee.platform_fulfilled.unwrap_or(true),
        };
        if let Some(fee) = state.fees.resolve_bounded(&lookup).await.fee {
            info!(target: "market.api", asin = %lookup.asin, total_fee = fee.total_fee, "margin_live_fee_attached");
            input.fee.live_fee = Some(fee.total_fee);
        }
    }

    Json(compute_margin_snapshot(&input))
}
