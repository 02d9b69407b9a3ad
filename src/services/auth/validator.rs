use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};

use crate::services::auth::{
    principal::{Claim, Principal},
    scheme::SchemeName,
};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("jwt verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("missing name claim '{0}'")]
    MissingName(&'static str),
    #[error("invalid verification key: {0}")]
    InvalidKey(String),
}

/// A downstream validator owning one authentication scheme.
#[async_trait]
pub trait TokenValidator: Send + Sync + std::fmt::Debug {
    async fn validate(&self, token: &str) -> Result<Principal, AuthError>;
}

/// JWT bearer validator (signature + `iss`/`aud`/`exp` via jsonwebtoken).
///
/// Used for both schemes: RS256 with the provider's public key for the
/// external authority, HS256 with the shared secret for the local issuer.
#[derive(Clone)]
pub struct JwtBearerValidator {
    scheme: SchemeName,
    decoding_key: DecodingKey,
    validation: Validation,
    name_claim_type: &'static str,
    fallback_name_claim_type: Option<&'static str>,
    role_claim_type: &'static str,
}

impl std::fmt::Debug for JwtBearerValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("JwtBearerValidator")
            .field("scheme", &self.scheme)
            .field("validation", &self.validation)
            .field("name_claim_type", &self.name_claim_type)
            .field("role_claim_type", &self.role_claim_type)
            .finish()
    }
}

impl JwtBearerValidator {
    /// RS256 validator for tokens signed by an external authority.
    pub fn rsa(
        scheme: SchemeName,
        public_key_pem: &str,
        issuer: &str,
        audience: &str,
        leeway_seconds: u64,
    ) -> Result<Self, AuthError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::InvalidKey(format!("invalid rsa public key pem: {e}")))?;

        Ok(Self::build(
            scheme,
            decoding_key,
            Algorithm::RS256,
            issuer,
            audience,
            leeway_seconds,
        ))
    }

    /// HS256 validator for tokens minted by the local issuer.
    pub fn hmac(
        scheme: SchemeName,
        secret: &[u8],
        issuer: &str,
        audience: &str,
        leeway_seconds: u64,
    ) -> Self {
        Self::build(
            scheme,
            DecodingKey::from_secret(secret),
            Algorithm::HS256,
            issuer,
            audience,
            leeway_seconds,
        )
    }

    fn build(
        scheme: SchemeName,
        decoding_key: DecodingKey,
        algorithm: Algorithm,
        issuer: &str,
        audience: &str,
        leeway_seconds: u64,
    ) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.leeway = leeway_seconds;

        Self {
            scheme,
            decoding_key,
            validation,
            name_claim_type: "sub",
            fallback_name_claim_type: None,
            role_claim_type: "role",
        }
    }

    /// Claim types used for `Principal::name` and roles.
    ///
    /// `fallback_name` is consulted when the token lacks the primary name claim.
    pub fn with_claim_types(
        mut self,
        name: &'static str,
        fallback_name: Option<&'static str>,
        role: &'static str,
    ) -> Self {
        self.name_claim_type = name;
        self.fallback_name_claim_type = fallback_name;
        self.role_claim_type = role;
        self
    }

    pub fn scheme(&self) -> &SchemeName {
        &self.scheme
    }

    fn to_principal(&self, payload: Map<String, Value>) -> Result<Principal, AuthError> {
        let claims = flatten_claims(payload);

        let has = |kind: &str| claims.iter().any(|c| c.kind == kind && !c.value.is_empty());
        let name_claim_type = if has(self.name_claim_type) {
            self.name_claim_type
        } else {
            self.fallback_name_claim_type
                .filter(|fallback| has(*fallback))
                .ok_or(AuthError::MissingName(self.name_claim_type))?
        };

        Ok(Principal::authenticated(
            self.scheme.clone(),
            name_claim_type,
            self.role_claim_type,
            claims,
        ))
    }
}

#[async_trait]
impl TokenValidator for JwtBearerValidator {
    async fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let data = jsonwebtoken::decode::<Map<String, Value>>(
            token,
            &self.decoding_key,
            &self.validation,
        )?;

        self.to_principal(data.claims)
    }
}

/// Flatten a JWT payload into claims.
///
/// - arrays become one claim per element (`roles: ["a","b"]`)
/// - numbers/bools keep their JSON text (`exp` → `"1700000000"`)
/// - nested objects are kept as compact JSON
fn flatten_claims(payload: Map<String, Value>) -> Vec<Claim> {
    let mut claims = Vec::with_capacity(payload.len());
    for (kind, value) in payload {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                claims.extend(
                    items
                        .into_iter()
                        .filter_map(scalar_text)
                        .map(|v| Claim::new(kind.clone(), v)),
                );
            }
            other => {
                if let Some(v) = scalar_text(other) {
                    claims.push(Claim::new(kind, v));
                }
            }
        }
    }
    claims
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
