use crate::cache::{Clock, KeyedLocks, TtlCache};
use crate::config::LWA_TOKEN_URL;
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_IDENTITY: &str = "default";
const MAX_TOKEN_LIFETIME_SECS: i64 = 86_400 * 365;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing refresh credentials")]
    MissingCredentials,
    #[error("token request failed: {0}")]
    Request(String),
    #[error("token endpoint returned HTTP {0}")]
    Status(u16),
    #[error("token response was malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
}

/// Refresh credential plus the identity its token is cached under.
#[derive(Clone)]
pub struct RefreshCredentials {
    pub identity: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl RefreshCredentials {
    fn cache_key(&self) -> &str {
        self.identity
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_IDENTITY)
    }
}

impl std::fmt::Debug for RefreshCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCredentials")
            .field("identity", &self.identity)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange(&self, credentials: &RefreshCredentials) -> Result<TokenGrant, AuthError>;
}

/// Login-with-Amazon refresh grant.
pub struct LwaTokenEndpoint {
    client: Client,
    url: String,
}

impl LwaTokenEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            url: url.into(),
        }
    }
}

impl Default for LwaTokenEndpoint {
    fn default() -> Self {
        Self::new(LWA_TOKEN_URL.as_str())
    }
}

#[async_trait]
impl TokenEndpoint for LwaTokenEndpoint {
    async fn exchange(&self, credentials: &RefreshCredentials) -> Result<TokenGrant, AuthError> {
        if credentials.client_id.is_empty()
            || credentials.client_secret.is_empty()
            || credentials.refresh_token.is_empty()
        {
            return Err(AuthError::MissingCredentials);
        }
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", credentials.refresh_token.as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ];
        let response = self
            .client
            .post(&self.url)
            .form(&params)
            .send()
            .await
            .map_err(|err| AuthError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Status(response.status().as_u16()));
        }

        let grant: TokenGrant = response
            .json()
            .await
            .map_err(|err| AuthError::Malformed(err.to_string()))?;
        if grant.access_token.trim().is_empty() {
            return Err(AuthError::Malformed("empty access_token".into()));
        }
        Ok(grant)
    }
}

/// Bearer tokens cached per credential identity. A token is reused until it
/// comes within `buffer` of its expiry; concurrent callers for one identity
/// share a single exchange.
pub struct AccessTokenCache {
    endpoint: Arc<dyn TokenEndpoint>,
    tokens: TtlCache<String>,
    inflight: KeyedLocks,
    buffer: chrono::Duration,
}

impl AccessTokenCache {
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        clock: Arc<dyn Clock>,
        buffer: chrono::Duration,
    ) -> Self {
        Self {
            endpoint,
            tokens: TtlCache::new(clock),
            inflight: KeyedLocks::default(),
            buffer,
        }
    }

    pub async fn get_access_token(
        &self,
        credentials: &RefreshCredentials,
    ) -> Result<String, AuthError> {
        let key = credentials.cache_key();
        if let Some(token) = self.tokens.get(key).await {
            return Ok(token);
        }

        let _flight = self.inflight.acquire(key).await;
        if let Some(token) = self.tokens.get(key).await {
            debug!(target: "market.auth", identity = %key, "token_shared_from_inflight");
            return Ok(token);
        }

        let exchanged = self
            .endpoint
            .exchange(credentials)
            .await
            .and_then(|grant| token_ttl(grant.expires_in, self.buffer).map(|ttl| (grant, ttl)));
        match exchanged {
            Ok((grant, ttl)) => {
                self.tokens.set(key, grant.access_token.clone(), ttl).await;
                info!(
                    target: "market.auth",
                    identity = %key,
                    expires_in = grant.expires_in,
                    "token_exchanged"
                );
                Ok(grant.access_token)
            }
            Err(err) => {
                self.tokens.remove(key).await;
                warn!(target: "market.auth", identity = %key, error = %err, "token_exchange_failed");
                Err(err)
            }
        }
    }
}

/// Cache lifetime for a grant: `expires_in` less the refresh buffer.
fn token_ttl(expires_in: i64, buffer: chrono::Duration) -> Result<chrono::Duration, AuthError> {
    if !(0..=MAX_TOKEN_LIFETIME_SECS).contains(&expires_in) {
        return Err(AuthError::Malformed(format!(
            "expires_in {expires_in} out of range"
        )));
    }
    chrono::Duration::seconds(expires_in)
        .checked_sub(&buffer)
        .ok_or_else(|| AuthError::Malformed("token lifetime overflow".into()))
}
