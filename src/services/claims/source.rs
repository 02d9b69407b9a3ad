/*
 * Responsibility
 * - 追加 claims の取得元 (ClaimsSource) の契約
 * - 遅い/リモートの可能性がある前提 (キャッシュは enrichment 側)
 */
use async_trait::async_trait;

use crate::services::{auth::principal::Claim, cache::CacheError};

#[derive(Debug, thiserror::Error)]
pub enum ClaimsSourceError {
    #[error(transparent)]
    Backend(#[from] CacheError),
    #[error("stored claims are malformed: {0}")]
    InvalidPayload(String),
}

#[async_trait]
pub trait ClaimsSource: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    async fn fetch_claims(&self, identity_name: &str) -> Result<Vec<Claim>, ClaimsSourceError>;
}

/// Same claims for every identity.
#[derive(Debug, Clone)]
pub struct StaticClaimsSource {
    claims: Vec<Claim>,
}

impl StaticClaimsSource {
    pub fn new(claims: Vec<Claim>) -> Self {
        Self { claims }
    }
}

#[async_trait]
impl ClaimsSource for StaticClaimsSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch_claims(&self, _identity_name: &str) -> Result<Vec<Claim>, ClaimsSourceError> {
        Ok(self.claims.clone())
    }
}
