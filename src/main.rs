use market_core::api::{AppState, router};
use market_core::cache::{CacheStore, Clock, InMemoryCacheStore, RedisCacheStore, SystemClock};
use market_core::config::{CoreConfig, SpApiCredentials, env_parse, is_production};
use market_core::fees::FeeResolutionService;
use market_core::market::MarketAnchorService;
use market_core::spapi::{AccessTokenCache, FeeQuoteSource, LwaTokenEndpoint, SpApiFeeClient};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target: "market.api", error = %err, "server_crashed");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = CoreConfig::load();
    info!(target: "market.api", ?config, production = is_production(), "config_loaded");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = cache_store();
    let source = live_fee_source(&config, clock.clone());

    let prometheus_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(target: "market.api", error = %err, "prometheus_recorder_unavailable");
            None
        }
    };

    let state = AppState {
        fees: Arc::new(FeeResolutionService::new(
            store.clone(),
            source,
            clock.clone(),
            config.fee_cache_ttl,
            config.live_lookup_timeout,
        )),
        anchors: Arc::new(MarketAnchorService::new(store, clock, config.anchor_ttl)),
        prometheus_handle,
        metrics_key: std::env::var("METRICS_KEY").ok(),
    };
    let app = router(state, body_limit_from_env());

    let port: u16 = env_parse("PORT").unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target: "market.api", %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn cache_store() -> Arc<dyn CacheStore> {
    if let Ok(url) = std::env::var("REDIS_URL") {
        match RedisCacheStore::from_url(&url) {
            Ok(store) => {
                info!(target: "market.cache", "redis_cache_store");
                return Arc::new(store);
            }
            Err(err) => {
                warn!(target: "market.cache", error = %err, "redis_unavailable_using_memory");
            }
        }
    }
    Arc::new(InMemoryCacheStore::default())
}

fn live_fee_source(config: &CoreConfig, clock: Arc<dyn Clock>) -> Option<Arc<dyn FeeQuoteSource>> {
    let Some(credentials) = SpApiCredentials::from_env() else {
        warn!(target: "market.fees", "spapi_credentials_missing_live_fees_disabled");
        return None;
    };
    let tokens = Arc::new(AccessTokenCache::new(
        Arc::new(LwaTokenEndpoint::default()),
        clock.clone(),
        config.token_expiry_buffer,
    ));
    let client: Arc<dyn FeeQuoteSource> = Arc::new(SpApiFeeClient::new(
        tokens,
        credentials,
        clock,
        is_production(),
    ));
    Some(client)
}

fn body_limit_from_env() -> usize {
    env_parse::<usize>("REQUEST_MAX_BYTES")
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
