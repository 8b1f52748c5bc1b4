//! Selling-partner API plumbing: request signing, token exchange and the
//! product-fees endpoint.

pub mod auth;
pub mod fees;
pub mod signer;

pub use auth::{AccessTokenCache, AuthError, LwaTokenEndpoint, RefreshCredentials, TokenEndpoint};
pub use fees::{FeeQuote, FeeQuoteError, FeeQuoteRequest, FeeQuoteSource, SpApiFeeClient};
pub use signer::{SignedHeaders, SigningError, SigningKeys, SigningScope, sign_request};
