use once_cell::sync::Lazy;
use serde::Deserialize;
use std::{env, path::Path, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

pub static SPAPI_ENV: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_ENV").unwrap_or_else(|_| "SANDBOX".to_string()));

pub static LWA_CLIENT_ID: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_LWA_CLIENT_ID").unwrap_or_default());

pub static LWA_CLIENT_SECRET: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_LWA_CLIENT_SECRET").unwrap_or_default());

pub static SPAPI_REFRESH_TOKEN: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_REFRESH_TOKEN").unwrap_or_default());

pub static AWS_ACCESS_KEY_ID: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_AWS_ACCESS_KEY_ID").unwrap_or_default());

pub static AWS_SECRET_ACCESS_KEY: Lazy<String> =
    Lazy::new(|| env::var("SPAPI_AWS_SECRET_ACCESS_KEY").unwrap_or_default());

pub static AWS_SESSION_TOKEN: Lazy<Option<String>> = Lazy::new(|| {
    env::var("SPAPI_AWS_SESSION_TOKEN")
        .ok()
        .filter(|value| !value.trim().is_empty())
});

pub static LWA_TOKEN_URL: Lazy<String> = Lazy::new(|| {
    env::var("LWA_TOKEN_URL").unwrap_or_else(|_| "https://api.amazon.com/auth/o2/token".to_string())
});

pub fn is_production() -> bool {
    matches!(
        SPAPI_ENV.trim().to_uppercase().as_str(),
        "PROD" | "PRODUCTION"
    )
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file: {0}")]
    Read(String),
    #[error("invalid config yaml: {0}")]
    Parse(String),
    #[error("`{0}` must be positive")]
    NonPositive(&'static str),
    #[error("`{0}` is out of range")]
    OutOfRange(&'static str),
}

/// Credentials for the live fee path. Absent credentials disable live
/// lookups; every caller then falls through to heuristics.
#[derive(Clone)]
pub struct SpApiCredentials {
    pub lwa_client_id: String,
    pub lwa_client_secret: String,
    pub refresh_token: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub aws_session_token: Option<String>,
}

impl SpApiCredentials {
    pub fn from_env() -> Option<Self> {
        let required = [
            LWA_CLIENT_ID.as_str(),
            LWA_CLIENT_SECRET.as_str(),
            SPAPI_REFRESH_TOKEN.as_str(),
            AWS_ACCESS_KEY_ID.as_str(),
            AWS_SECRET_ACCESS_KEY.as_str(),
        ];
        if required.iter().any(|value| value.trim().is_empty()) {
            return None;
        }
        Some(Self {
            lwa_client_id: LWA_CLIENT_ID.clone(),
            lwa_client_secret: LWA_CLIENT_SECRET.clone(),
            refresh_token: SPAPI_REFRESH_TOKEN.clone(),
            aws_access_key_id: AWS_ACCESS_KEY_ID.clone(),
            aws_secret_access_key: AWS_SECRET_ACCESS_KEY.clone(),
            aws_session_token: AWS_SESSION_TOKEN.clone(),
        })
    }
}

impl std::fmt::Debug for SpApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpApiCredentials")
            .field("lwa_client_id", &self.lwa_client_id)
            .field("aws_access_key_id", &self.aws_access_key_id)
            .finish_non_exhaustive()
    }
}

/// Tunables for the estimation core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub fee_cache_ttl: chrono::Duration,
    pub anchor_ttl: chrono::Duration,
    pub live_lookup_timeout: Duration,
    pub token_expiry_buffer: chrono::Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            fee_cache_ttl: chrono::Duration::hours(24),
            anchor_ttl: chrono::Duration::hours(24),
            live_lookup_timeout: Duration::from_millis(2000),
            token_expiry_buffer: chrono::Duration::minutes(5),
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let overlay = ConfigOverlay {
            fee_cache_ttl_hours: env_parse("FEE_CACHE_TTL_HOURS"),
            anchor_ttl_hours: env_parse("MARKET_ANCHOR_TTL_HOURS"),
            live_lookup_timeout_ms: env_parse("FEE_LOOKUP_TIMEOUT_MS"),
            token_expiry_buffer_secs: env_parse("TOKEN_EXPIRY_BUFFER_SECS"),
        };
        let mut config = Self::default();
        if let Err(err) = config.apply(overlay) {
            warn!(target: "market.config", error = %err, "env_config_ignored");
        }
        config
    }

    /// Env values first, then the YAML file named by `MARKET_CORE_CONFIG`.
    pub fn load() -> Self {
        let mut config = Self::from_env();
        if let Ok(path) = env::var("MARKET_CORE_CONFIG") {
            match ConfigOverlay::from_file(&path).and_then(|overlay| config.apply(overlay)) {
                Ok(()) => info!(target: "market.config", path = %path, "config_overlay_applied"),
                Err(err) => {
                    warn!(target: "market.config", path = %path, error = %err, "config_overlay_rejected")
                }
            }
        }
        config
    }

    /// Validates the whole overlay before touching any field, so a bad file
    /// leaves the config as it was.
    pub fn apply(&mut self, overlay: ConfigOverlay) -> Result<(), ConfigError> {
        let fee_ttl = positive_hours(overlay.fee_cache_ttl_hours, "fee_cache_ttl_hours")?;
        let anchor_ttl = positive_hours(overlay.anchor_ttl_hours, "anchor_ttl_hours")?;
        if overlay.live_lookup_timeout_ms == Some(0) {
            return Err(ConfigError::NonPositive("live_lookup_timeout_ms"));
        }
        let token_buffer = match overlay.token_expiry_buffer_secs {
            Some(secs) if secs < 0 => {
                return Err(ConfigError::NonPositive("token_expiry_buffer_secs"));
            }
            Some(secs) => Some(
                chrono::Duration::try_seconds(secs)
                    .filter(|buffer| *buffer <= chrono::Duration::days(1))
                    .ok_or(ConfigError::OutOfRange("token_expiry_buffer_secs"))?,
            ),
            None => None,
        };

        if let Some(ttl) = fee_ttl {
            self.fee_cache_ttl = ttl;
        }
        if let Some(ttl) = anchor_ttl {
            self.anchor_ttl = ttl;
        }
        if let Some(ms) = overlay.live_lookup_timeout_ms {
            self.live_lookup_timeout = Duration::from_millis(ms);
        }
        if let Some(buffer) = token_buffer {
            self.token_expiry_buffer = buffer;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverlay {
    pub fee_cache_ttl_hours: Option<i64>,
    pub anchor_ttl_hours: Option<i64>,
    pub live_lookup_timeout_ms: Option<u64>,
    pub token_expiry_buffer_secs: Option<i64>,
}

impl ConfigOverlay {
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|err| ConfigError::Read(err.to_string()))?;
        Self::from_yaml(&raw)
    }
}

const MAX_TTL_DAYS: i64 = 365;

fn positive_hours(
    value: Option<i64>,
    field: &'static str,
) -> Result<Option<chrono::Duration>, ConfigError> {
    match value {
        Some(hours) if hours <= 0 => Err(ConfigError::NonPositive(field)),
        Some(hours) => chrono::Duration::try_hours(hours)
            .filter(|ttl| *ttl <= chrono::Duration::days(MAX_TTL_DAYS))
            .map(Some)
            .ok_or(ConfigError::OutOfRange(field)),
        None => Ok(None),
    }
}

pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}
