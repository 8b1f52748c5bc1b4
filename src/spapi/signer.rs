//! Request signing for the selling-partner API (AWS Signature Version 4,
//! `AWS4-HMAC-SHA256`).
//!
//! Pure and deterministic: the same request, keys, scope and timestamp always
//! produce the same headers.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SCOPE_TERMINATOR: &str = "aws4_request";
pub const EXECUTE_API_SERVICE: &str = "execute-api";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("missing required signing input `{0}`")]
    MissingInput(&'static str),
    #[error("request path must start with '/': {0}")]
    InvalidPath(String),
    #[error("invalid hmac key")]
    InvalidKey,
}

/// Long-lived IAM key pair used to derive per-day signing keys.
#[derive(Clone)]
pub struct SigningKeys {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeys")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SigningScope {
    pub region: String,
    pub service: String,
}

impl SigningScope {
    pub fn execute_api(region: &str) -> Self {
        Self {
            region: region.to_string(),
            service: EXECUTE_API_SERVICE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub body: &'a [u8],
    pub access_token: &'a str,
}

/// Headers to attach to the outgoing request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub headers: Vec<(String, String)>,
}

pub fn sign_request(
    request: &SignableRequest<'_>,
    keys: &SigningKeys,
    scope: &SigningScope,
    at: DateTime<Utc>,
) -> Result<SignedHeaders, SigningError> {
    require(request.method, "method")?;
    require(request.host, "host")?;
    require(request.access_token, "access_token")?;
    require(&keys.access_key_id, "access_key_id")?;
    require(&keys.secret_access_key, "secret_access_key")?;
    require(&scope.region, "region")?;
    require(&scope.service, "service")?;
    if !request.path.starts_with('/') {
        return Err(SigningError::InvalidPath(request.path.to_string()));
    }

    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = at.format("%Y%m%d").to_string();

    let mut headers = BTreeMap::new();
    headers.insert("host".to_string(), request.host.trim().to_lowercase());
    headers.insert(
        "x-amz-access-token".to_string(),
        request.access_token.trim().to_string(),
    );
    headers.insert("x-amz-date".to_string(), amz_date.clone());
    if let Some(token) = keys.session_token.as_deref().filter(|t| !t.is_empty()) {
        headers.insert("x-amz-security-token".to_string(), token.to_string());
    }

    let canonical = canonical_request(
        &request.method.to_uppercase(),
        request.path,
        request.query,
        &headers,
        &sha256_hex(request.body),
    );
    let credential_scope = format!(
        "{date_stamp}/{}/{}/{SCOPE_TERMINATOR}",
        scope.region, scope.service
    );
    let to_sign = string_to_sign(&amz_date, &credential_scope, &canonical);
    let signing_key = derive_signing_key(
        &keys.secret_access_key,
        &date_stamp,
        &scope.region,
        &scope.service,
    )?;
    let signature = hex::encode(hmac_sha256(&signing_key, to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={}, Signature={signature}",
        keys.access_key_id,
        signed_header_list(&headers),
    );

    let headers = headers
        .into_iter()
        .filter(|(name, _)| name != "host")
        .collect();

    Ok(SignedHeaders {
        authorization,
        amz_date,
        headers,
    })
}

fn require(value: &str, field: &'static str) -> Result<(), SigningError> {
    if value.trim().is_empty() {
        Err(SigningError::MissingInput(field))
    } else {
        Ok(())
    }
}

pub(crate) fn canonical_request(
    method: &str,
    path: &str,
    query: &str,
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", collapse_whitespace(value)))
        .collect();
    format!(
        "{method}\n{}\n{}\n{canonical_headers}\n{}\n{payload_hash}",
        canonical_uri(path),
        canonical_query(query),
        signed_header_list(headers),
    )
}

fn signed_header_list(headers: &BTreeMap<String, String>) -> String {
    headers.keys().cloned().collect::<Vec<_>>().join(";")
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Each segment is decoded then re-encoded so already-escaped paths are not
/// double-escaped.
fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| {
            let decoded = urlencoding::decode(segment)
                .map(|value| value.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            urlencoding::encode(&decoded).into_owned()
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (encode_component(name), encode_component(value))
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_component(raw: &str) -> String {
    let decoded = urlencoding::decode(&raw.replace('+', " "))
        .map(|value| value.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    urlencoding::encode(&decoded).into_owned()
}

pub(crate) fn string_to_sign(amz_date: &str, credential_scope: &str, canonical: &str) -> String {
    format!(
        "{ALGORITHM}\n{amz_date}\n{credential_scope}\n{}",
        sha256_hex(canonical.as_bytes())
    )
}

/// date → region → service → `aws4_request`, each step keyed by the last.
pub(crate) fn derive_signing_key(
    secret: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SigningError> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
}

fn hmac_sha256(key: &[u8], payload: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SigningError::InvalidKey)?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EXAMPLE_SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn keys() -> SigningKeys {
        SigningKeys {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: EXAMPLE_SECRET.into(),
            session_token: None,
        }
    }

    fn fees_request<'a>(body: &'a [u8]) -> SignableRequest<'a> {
        SignableRequest {
            method: "POST",
            host: "sellingpartnerapi-na.amazon.com",
            path: "/products/fees/v0/items/B00TEST123/feesEstimate",
            query: "",
            body,
            access_token: "Atza|example-token",
        }
    }

    #[test]
    fn derived_key_matches_published_vector() {
        let key = derive_signing_key(EXAMPLE_SECRET, "20120215", "us-east-1", "iam")
            .expect("key derivation");
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn vanilla_get_matches_published_signature() {
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), "example.amazon.com".to_string());
        headers.insert("x-amz-date".to_string(), "20150830T123600Z".to_string());
        let canonical = canonical_request("GET", "/", "", &headers, &sha256_hex(b""));
        assert_eq!(
            canonical,
            "GET\n/\n\nhost:example.amazon.com\nx-amz-date:20150830T123600Z\n\nhost;x-amz-date\ne3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        let to_sign = string_to_sign(
            "20150830T123600Z",
            "20150830/us-east-1/service/aws4_request",
            &canonical,
        );
        let key = derive_signing_key(EXAMPLE_SECRET, "20150830", "us-east-1", "service")
            .expect("key derivation");
        let signature = hex::encode(hmac_sha256(&key, to_sign.as_bytes()).expect("hmac"));
        assert_eq!(
            signature,
            "5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
    }

    #[test]
    fn authorization_header_carries_scope_and_signed_headers() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 8, 15, 0).unwrap();
        let body = br#"{"FeesEstimateRequest":{}}"#;
        let signed = sign_request(
            &fees_request(body),
            &keys(),
            &SigningScope::execute_api("us-east-1"),
            at,
        )
        .expect("signs");

        assert_eq!(signed.amz_date, "20240309T081500Z");
        assert!(signed.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240309/us-east-1/execute-api/aws4_request, "
        ));
        assert!(
            signed
                .authorization
                .contains("SignedHeaders=host;x-amz-access-token;x-amz-date, ")
        );
        let signature = signed
            .authorization
            .rsplit("Signature=")
            .next()
            .expect("signature present");
        assert_eq!(signature.len(), 64);
        assert!(
            signed
                .headers
                .iter()
                .any(|(name, value)| name == "x-amz-access-token" && value == "Atza|example-token")
        );
    }

    #[test]
    fn signing_is_deterministic_and_sensitive_to_body() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 8, 15, 0).unwrap();
        let scope = SigningScope::execute_api("us-east-1");
        let first = sign_request(&fees_request(b"a"), &keys(), &scope, at).expect("signs");
        let second = sign_request(&fees_request(b"a"), &keys(), &scope, at).expect("signs");
        let third = sign_request(&fees_request(b"b"), &keys(), &scope, at).expect("signs");
        assert_eq!(first.authorization, second.authorization);
        assert_ne!(first.authorization, third.authorization);
    }

    #[test]
    fn session_token_is_signed_when_present() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 8, 15, 0).unwrap();
        let mut keys = keys();
        keys.session_token = Some("session-abc".into());
        let signed = sign_request(
            &fees_request(b""),
            &keys,
            &SigningScope::execute_api("eu-west-1"),
            at,
        )
        .expect("signs");
        assert!(signed.authorization.contains(
            "SignedHeaders=host;x-amz-access-token;x-amz-date;x-amz-security-token"
        ));
    }

    #[test]
    fn query_is_sorted_and_encoded() {
        assert_eq!(
            canonical_query("b=2&a=hello world&a=1"),
            "a=1&a=hello%20world&b=2"
        );
        assert_eq!(canonical_query("?MarketplaceIds=ATVPDKIKX0DER"), "MarketplaceIds=ATVPDKIKX0DER");
        assert_eq!(canonical_query(""), "");
    }

    #[test]
    fn path_segments_are_not_double_encoded() {
        assert_eq!(canonical_uri("/items/a%20b/fees"), "/items/a%20b/fees");
        assert_eq!(canonical_uri("/items/a b"), "/items/a%20b");
    }

    #[test]
    fn rejects_invalid_inputs() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 8, 15, 0).unwrap();
        let scope = SigningScope::execute_api("us-east-1");
        let mut request = fees_request(b"");
        request.access_token = " ";
        assert_eq!(
            sign_request(&request, &keys(), &scope, at).unwrap_err(),
            SigningError::MissingInput("access_token")
        );

        let mut request = fees_request(b"");
        request.path = "products";
        assert!(matches!(
            sign_request(&request, &keys(), &scope, at),
            Err(SigningError::InvalidPath(_))
        ));
    }
}
