/// Factories: build the auth services from application `Config`.
use std::sync::Arc;

use crate::config::Config;
use crate::services::auth::{
    LocalTokenIssuer, SchemeDispatcher, SchemeName, SchemeRegistry,
    validator::{AuthError, JwtBearerValidator},
};
use crate::services::clock::Clock;

pub fn build_dispatcher(config: &Config) -> SchemeDispatcher {
    SchemeDispatcher::new(
        config.external_issuer_prefix.clone(),
        SchemeName::new(config.external_scheme.as_str()),
        SchemeName::new(config.default_scheme.as_str()),
    )
}

/// External provider: RS256, `preferred_username` / `roles`.
/// Local bearer: HS256, `unique_name` (or `sub`) / `role`.
pub fn build_scheme_registry(config: &Config) -> Result<SchemeRegistry, AuthError> {
    let external = JwtBearerValidator::rsa(
        SchemeName::new(config.external_scheme.as_str()),
        &config.azure_ad.public_key_pem,
        &config.azure_ad.issuer(),
        &config.azure_ad.client_id,
        config.token_leeway_seconds,
    )?
    .with_claim_types("preferred_username", None, "roles");

    let local = JwtBearerValidator::hmac(
        SchemeName::new(config.default_scheme.as_str()),
        config.local.secret.as_bytes(),
        &config.local.issuer,
        &config.local.audience,
        config.token_leeway_seconds,
    )
    .with_claim_types("unique_name", Some("sub"), "role");

    Ok(SchemeRegistry::new()
        .register(external.scheme().clone(), Arc::new(external))
        .register(local.scheme().clone(), Arc::new(local)))
}

pub fn build_local_issuer(config: &Config, clock: Arc<dyn Clock>) -> LocalTokenIssuer {
    LocalTokenIssuer::new(
        config.local.secret.as_bytes(),
        config.local.issuer.clone(),
        config.local.audience.clone(),
        config.local.token_ttl_seconds,
        clock,
    )
}
