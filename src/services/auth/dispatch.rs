//! Bearer token scheme dispatch.
//!
//! Picks which validator should own a request by peeking at the *unverified*
//! `iss` claim. Nothing here is a trust decision: a forged issuer only routes
//! the token to a validator that will reject it.
//!
//! - never fails outward; every unreadable input falls back to the default scheme
//! - no I/O, no shared state

use base64::{
    Engine as _,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::services::auth::scheme::SchemeName;

const BEARER_PREFIX: &str = "Bearer ";

// Anything larger is not a token we are willing to peek into.
const MAX_TOKEN_LEN: usize = 16 * 1024;

// JWS compact segments are base64url; some issuers keep the padding.
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Payload fields read without signature verification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnverifiedClaims {
    pub issuer: Option<String>,
    pub exp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Unreadable {
    #[error("token is too large")]
    TooLarge,
    #[error("expected 3 token segments, got {0}")]
    SegmentCount(usize),
    #[error("token {0} segment is not base64url")]
    Encoding(&'static str),
    #[error("token {0} segment is not a JSON object")]
    Json(&'static str),
}

/// Extract the credential from an `Authorization: Bearer <token>` value.
///
/// The prefix is case-sensitive. Returns `None` for an empty credential.
pub fn bearer_token(authorization: &str) -> Option<&str> {
    let token = authorization.strip_prefix(BEARER_PREFIX)?.trim();
    (!token.is_empty()).then_some(token)
}

/// Structural decode of a compact JWS (`header.payload.signature`).
///
/// Header and payload must both be base64url-encoded JSON objects.
/// The signature segment is not inspected.
pub fn peek_claims(token: &str) -> Result<UnverifiedClaims, Unreadable> {
    if token.len() > MAX_TOKEN_LEN {
        return Err(Unreadable::TooLarge);
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(Unreadable::SegmentCount(segments.len()));
    }

    decode_object(segments[0], "header")?;
    let payload = decode_object(segments[1], "payload")?;

    let issuer = payload
        .get("iss")
        .and_then(Value::as_str)
        .map(str::to_owned);

    // NumericDate may legally carry a fraction.
    let exp = payload.get("exp").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
    });

    Ok(UnverifiedClaims { issuer, exp })
}

fn decode_object(segment: &str, which: &'static str) -> Result<Map<String, Value>, Unreadable> {
    let bytes = SEGMENT_ENGINE
        .decode(segment)
        .map_err(|_| Unreadable::Encoding(which))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(Unreadable::Json(which)),
    }
}

/// Routes an `Authorization` header to a scheme name.
#[derive(Debug, Clone)]
pub struct SchemeDispatcher {
    external_issuer_prefix: String,
    external_scheme: SchemeName,
    default_scheme: SchemeName,
}

impl SchemeDispatcher {
    pub fn new(
        external_issuer_prefix: impl Into<String>,
        external_scheme: SchemeName,
        default_scheme: SchemeName,
    ) -> Self {
        Self {
            external_issuer_prefix: external_issuer_prefix.into(),
            external_scheme,
            default_scheme,
        }
    }

    pub fn select_scheme(&self, authorization: Option<&str>) -> SchemeName {
        let Some(token) = authorization.and_then(bearer_token) else {
            return self.default_scheme.clone();
        };

        let claims = match peek_claims(token) {
            Ok(claims) => claims,
            Err(reason) => {
                debug!(%reason, scheme = %self.default_scheme, "unreadable bearer token, using default scheme");
                return self.default_scheme.clone();
            }
        };

        let external = !self.external_issuer_prefix.is_empty()
            && claims
                .issuer
                .as_deref()
                .is_some_and(|iss| iss.starts_with(&self.external_issuer_prefix));

        let scheme = if external {
            &self.external_scheme
        } else {
            &self.default_scheme
        };

        debug!(issuer = ?claims.issuer, exp = ?claims.exp, scheme = %scheme, "bearer token dispatched");
        scheme.clone()
    }
}
