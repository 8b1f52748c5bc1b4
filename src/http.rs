use crate::config::env_parse;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

const USER_AGENT: &str = concat!("market-core/", env!("CARGO_PKG_VERSION"), " (Language=Rust)");

pub fn build_client() -> Client {
    let timeout = env_parse::<u64>("HTTP_TIMEOUT_SECS").unwrap_or(15);
    build_client_with_timeout(Duration::from_secs(timeout))
}

/// Client for calls that sit on a request path; the overall timeout bounds
/// connect time as well.
pub fn build_client_with_timeout(timeout: Duration) -> Client {
    let connect = Duration::from_secs(env_parse::<u64>("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5));
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(connect.min(timeout))
        .build()
        .unwrap_or_else(|err| {
            warn!(target: "market.http", error = %err, "client_builder_failed_using_default");
            Client::new()
        })
}
