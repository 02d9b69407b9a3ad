use std::sync::Arc;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::services::clock::Clock;

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("user name must not be empty")]
    EmptySubject,
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize)]
struct LocalTokenClaims<'a> {
    iss: &'a str,
    aud: &'a str,
    sub: &'a str,
    unique_name: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// HS256 issuer for `LocalBearer` tokens.
///
/// - Key material is intentionally not printable via Debug.
#[derive(Clone)]
pub struct LocalTokenIssuer {
    issuer: String,
    audience: String,
    ttl_seconds: u64,
    encoding_key: EncodingKey,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LocalTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTokenIssuer")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

impl LocalTokenIssuer {
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        audience: impl Into<String>,
        ttl_seconds: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_seconds,
            encoding_key: EncodingKey::from_secret(secret),
            clock,
        }
    }

    pub fn issue(&self, user_name: &str) -> Result<IssuedToken, IssueError> {
        let user_name = user_name.trim();
        if user_name.is_empty() {
            return Err(IssueError::EmptySubject);
        }

        let now = self.clock.now().timestamp();
        let claims = LocalTokenClaims {
            iss: &self.issuer,
            aud: &self.audience,
            sub: user_name,
            unique_name: user_name,
            iat: now,
            exp: now + self.ttl_seconds as i64,
            jti: Uuid::new_v4().to_string(),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some("JWT".to_string());
        let access_token = jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .inspect_err(|e| error!(error = %e, "failed to sign local token"))?;

        Ok(IssuedToken {
            access_token,
            token_type: "Bearer",
            expires_in: self.ttl_seconds,
        })
    }
}
