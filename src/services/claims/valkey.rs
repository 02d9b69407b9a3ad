use std::sync::Arc;

use async_trait::async_trait;

use crate::services::{
    auth::principal::Claim,
    cache::{CacheClient, ValkeyClient},
    claims::source::{ClaimsSource, ClaimsSourceError},
};

/// Claims stored in Valkey as a JSON array under `<prefix>:<identity name>`:
///
/// ```text
/// SET claims:alice '[{"type":"role","value":"Administrator"}]'
/// ```
///
/// A missing key means "no additional claims".
#[derive(Debug, Clone)]
pub struct ValkeyClaimsSource<C: CacheClient> {
    cache: Arc<C>,
    prefix: String,
}

impl ValkeyClaimsSource<ValkeyClient> {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, ClaimsSourceError> {
        let client = ValkeyClient::new(url).await?;
        Ok(Self::new_with_cache(Arc::new(client), prefix))
    }
}

impl<C: CacheClient> ValkeyClaimsSource<C> {
    pub fn new_with_cache(cache: Arc<C>, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, identity_name: &str) -> String {
        format!("{}:{}", self.prefix, identity_name)
    }
}

#[async_trait]
impl<C: CacheClient + std::fmt::Debug> ClaimsSource for ValkeyClaimsSource<C> {
    fn name(&self) -> &'static str {
        self.cache.backend_name()
    }

    async fn fetch_claims(&self, identity_name: &str) -> Result<Vec<Claim>, ClaimsSourceError> {
        let key = self.key(identity_name);

        let Some(raw) = self.cache.get_string(&key).await? else {
            tracing::debug!(%key, "no stored claims");
            return Ok(Vec::new());
        };

        serde_json::from_str::<Vec<Claim>>(&raw)
            .map_err(|e| ClaimsSourceError::InvalidPayload(format!("{key}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::services::cache::{CacheError, client::CacheResult};

    #[derive(Debug, Clone, Default)]
    struct MemoryCache {
        values: Arc<Mutex<HashMap<String, String>>>,
        down: bool,
    }

    impl MemoryCache {
        fn with(key: &str, value: &str) -> Self {
            let cache = Self::default();
            cache.values.lock().unwrap().insert(key.into(), value.into());
            cache
        }
    }

    #[async_trait]
    impl CacheClient for MemoryCache {
        fn backend_name(&self) -> &'static str {
            "memory"
        }

        async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
            if self.down {
                return Err(CacheError::BackendConnection("connection refused".into()));
            }
            Ok(self.values.lock().unwrap().get(key).cloned())
        }
    }

    #[tokio::test]
    async fn reads_json_claims_under_prefixed_key() {
        let cache = MemoryCache::with(
            "claims:alice",
            r#"[{"type":"role","value":"Administrator"},{"type":"dept","value":"R&D"}]"#,
        );
        let source = ValkeyClaimsSource::new_with_cache(Arc::new(cache), "claims");

        let claims = source.fetch_claims("alice").await.unwrap();
        assert_eq!(
            claims,
            vec![Claim::new("role", "Administrator"), Claim::new("dept", "R&D")]
        );
        assert_eq!(source.name(), "memory");
    }

    #[tokio::test]
    async fn missing_key_means_no_claims() {
        let source = ValkeyClaimsSource::new_with_cache(Arc::new(MemoryCache::default()), "claims");
        assert!(source.fetch_claims("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error() {
        let cache = MemoryCache::with("claims:alice", "role=Administrator");
        let source = ValkeyClaimsSource::new_with_cache(Arc::new(cache), "claims");

        let err = source.fetch_claims("alice").await.unwrap_err();
        assert!(matches!(err, ClaimsSourceError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn backend_failure_is_propagated() {
        let cache = MemoryCache {
            down: true,
            ..Default::default()
        };
        let source = ValkeyClaimsSource::new_with_cache(Arc::new(cache), "claims");

        let err = source.fetch_claims("alice").await.unwrap_err();
        assert!(matches!(err, ClaimsSourceError::Backend(_)));
    }
}
