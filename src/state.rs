/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 *   - dispatcher / scheme registry / claims cache / local issuer
 * - Clone 前提で持つ (内部は Arc/Clone cheap)
 */
use std::sync::Arc;

use crate::config::EnrichmentFailurePolicy;
use crate::services::{
    auth::{LocalTokenIssuer, SchemeDispatcher, SchemeRegistry},
    claims::ClaimsEnrichmentCache,
};

#[derive(Clone, Debug)]
pub struct AppState {
    pub dispatcher: Arc<SchemeDispatcher>,
    pub schemes: Arc<SchemeRegistry>,
    pub claims: ClaimsEnrichmentCache,
    pub issuer: Arc<LocalTokenIssuer>,
    pub failure_policy: EnrichmentFailurePolicy,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<SchemeDispatcher>,
        schemes: Arc<SchemeRegistry>,
        claims: ClaimsEnrichmentCache,
        issuer: Arc<LocalTokenIssuer>,
        failure_policy: EnrichmentFailurePolicy,
    ) -> Self {
        Self {
            dispatcher,
            schemes,
            claims,
            issuer,
            failure_policy,
        }
    }
}
