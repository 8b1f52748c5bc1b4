use super::auth::{AccessTokenCache, AuthError, RefreshCredentials};
use super::signer::{SignableRequest, SigningError, SigningKeys, SigningScope, sign_request};
use crate::cache::Clock;
use crate::config::SpApiCredentials;
use crate::http::build_client;
use crate::models::MarketplaceId;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FeeQuoteError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("fee request failed: {0}")]
    Transport(String),
    #[error("fee response was malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeQuoteRequest {
    pub asin: String,
    pub price: f64,
    pub marketplace: MarketplaceId,
    pub platform_fulfilled: bool,
}

/// Fee components as returned by the platform; either may be absent.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeQuote {
    pub fulfillment_fee: Option<f64>,
    pub referral_fee: Option<f64>,
    pub currency: String,
}

impl FeeQuote {
    pub fn is_complete(&self) -> bool {
        self.fulfillment_fee.is_some() && self.referral_fee.is_some()
    }
}

/// Live fee lookups. `Ok(None)` means the platform had no quote to give,
/// which is an expected outcome rather than a failure.
#[async_trait]
pub trait FeeQuoteSource: Send + Sync {
    async fn fetch_quote(&self, request: &FeeQuoteRequest) -> Result<Option<FeeQuote>, FeeQuoteError>;
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct FeesEstimateBody<'a> {
    fees_estimate_request: FeesEstimateRequest<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct FeesEstimateRequest<'a> {
    marketplace_id: &'a str,
    is_amazon_fulfilled: bool,
    price_to_estimate_fees: PriceToEstimateFees<'a>,
    identifier: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PriceToEstimateFees<'a> {
    listing_price: MoneyAmount<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct MoneyAmount<'a> {
    currency_code: &'a str,
    amount: f64,
}

#[derive(Debug, Default, Deserialize)]
struct FeesEstimateResponse {
    #[serde(default)]
    payload: Option<FeesPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FeesPayload {
    #[serde(default)]
    fees_estimate_result: Option<FeesEstimateResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FeesEstimateResult {
    #[serde(default)]
    fees_estimate: Option<FeesEstimate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FeesEstimate {
    #[serde(default)]
    fee_detail_list: Vec<FeeDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FeeDetail {
    fee_type: String,
    #[serde(default)]
    final_fee: Option<Money>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Money {
    #[serde(default)]
    currency_code: Option<String>,
    #[serde(default)]
    amount: Option<f64>,
}

fn is_fulfillment_fee(fee_type: &str) -> bool {
    matches!(fee_type, "FBAFees" | "FBAPerUnitFulfillmentFee")
}

/// Pulls the two components we care about out of a fee breakdown. Returns
/// `None` when neither label is present.
fn extract_quote(raw: &str, fallback_currency: &str) -> Result<Option<FeeQuote>, FeeQuoteError> {
    let parsed: FeesEstimateResponse =
        serde_json::from_str(raw).map_err(|err| FeeQuoteError::Malformed(err.to_string()))?;
    let details = parsed
        .payload
        .and_then(|payload| payload.fees_estimate_result)
        .and_then(|result| result.fees_estimate)
        .map(|estimate| estimate.fee_detail_list)
        .unwrap_or_default();

    let mut quote = FeeQuote {
        fulfillment_fee: None,
        referral_fee: None,
        currency: fallback_currency.to_string(),
    };
    for detail in details {
        let Some(money) = detail.final_fee else {
            continue;
        };
        let Some(amount) = money.amount.filter(|value| value.is_finite()) else {
            continue;
        };
        if let Some(code) = money.currency_code.filter(|code| !code.is_empty()) {
            quote.currency = code;
        }
        if is_fulfillment_fee(&detail.fee_type) && quote.fulfillment_fee.is_none() {
            quote.fulfillment_fee = Some(amount);
        } else if detail.fee_type == "ReferralFee" {
            quote.referral_fee = Some(amount);
        }
    }

    if quote.fulfillment_fee.is_none() && quote.referral_fee.is_none() {
        return Ok(None);
    }
    Ok(Some(quote))
}

/// Signed calls to the product-fees endpoint.
pub struct SpApiFeeClient {
    client: Client,
    tokens: Arc<AccessTokenCache>,
    credentials: SpApiCredentials,
    clock: Arc<dyn Clock>,
    production: bool,
}

impl SpApiFeeClient {
    pub fn new(
        tokens: Arc<AccessTokenCache>,
        credentials: SpApiCredentials,
        clock: Arc<dyn Clock>,
        production: bool,
    ) -> Self {
        Self {
            client: build_client(),
            tokens,
            credentials,
            clock,
            production,
        }
    }

    fn refresh_credentials(&self) -> RefreshCredentials {
        RefreshCredentials {
            identity: None,
            client_id: self.credentials.lwa_client_id.clone(),
            client_secret: self.credentials.lwa_client_secret.clone(),
            refresh_token: self.credentials.refresh_token.clone(),
        }
    }

    fn signing_keys(&self) -> SigningKeys {
        SigningKeys {
            access_key_id: self.credentials.aws_access_key_id.clone(),
            secret_access_key: self.credentials.aws_secret_access_key.clone(),
            session_token: self.credentials.aws_session_token.clone(),
        }
    }
}

#[async_trait]
impl FeeQuoteSource for SpApiFeeClient {
    async fn fetch_quote(&self, request: &FeeQuoteRequest) -> Result<Option<FeeQuote>, FeeQuoteError> {
        let token = self
            .tokens
            .get_access_token(&self.refresh_credentials())
            .await?;

        let marketplace = request.marketplace;
        let currency = marketplace.currency();
        let body = FeesEstimateBody {
            fees_estimate_request: FeesEstimateRequest {
                marketplace_id: marketplace.platform_id(),
                is_amazon_fulfilled: request.platform_fulfilled,
                price_to_estimate_fees: PriceToEstimateFees {
                    listing_price: MoneyAmount {
                        currency_code: currency,
                        amount: request.price,
                    },
                },
                identifier: &request.asin,
            },
        };
        let payload =
            serde_json::to_vec(&body).map_err(|err| FeeQuoteError::Malformed(err.to_string()))?;

        let host = marketplace.api_host(self.production);
        let path = format!(
            "/products/fees/v0/items/{}/feesEstimate",
            urlencoding::encode(&request.asin)
        );
        let signed = sign_request(
            &SignableRequest {
                method: "POST",
                host,
                path: &path,
                query: "",
                body: &payload,
                access_token: &token,
            },
            &self.signing_keys(),
            &SigningScope::execute_api(marketplace.signing_region()),
            self.clock.now(),
        )?;

        let mut builder = self
            .client
            .post(format!("https://{host}{path}"))
            .header("authorization", &signed.authorization)
            .header("content-type", "application/json");
        for (name, value) in &signed.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder
            .body(payload)
            .send()
            .await
            .map_err(|err| FeeQuoteError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                target: "market.fees",
                asin = %request.asin,
                status = status.as_u16(),
                "fee_quote_rejected"
            );
            return Ok(None);
        }

        let raw = response
            .text()
            .await
            .map_err(|err| FeeQuoteError::Transport(err.to_string()))?;
        let quote = extract_quote(&raw, currency)?;
        debug!(
            target: "market.fees",
            asin = %request.asin,
            complete = quote.as_ref().is_some_and(FeeQuote::is_complete),
            "fee_quote_received"
        );
        Ok(quote)
    }
}
