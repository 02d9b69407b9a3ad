/*
 * Responsibility
 * - Config読み込み → 依存生成 → Router 組み立て
 * - Middleware の適用 (request id / trace / bearer auth)
 * - axum::serve() で起動
 */
use std::{panic, process, sync::Arc};

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::api::handlers::health::health;
use crate::config::Config;
use crate::middleware;
use crate::services::{
    auth::{build_dispatcher, build_local_issuer, build_scheme_registry, principal::ROLE_CLAIM, Claim},
    claims::{ClaimsEnrichmentCache, ClaimsSource, StaticClaimsSource, ValkeyClaimsSource},
    clock::{Clock, SystemClock},
};
use crate::state::AppState;

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,multi_auth_api=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    // Keep the default hook as a fallback (prints to stderr with location/payload).
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Always surface panics via tracing so they don't get "lost".
        tracing::error!(?info, "panic");

        // In development, fail fast. In production, keep serving.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env()?;

    init_panic_hook(!config.app_env.is_production());

    tracing::info!(?config, "starting API in {:?} mode on {}", config.app_env, config.addr);

    let state = build_state(&config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_state(config: &Config) -> Result<AppState> {
    // Process-level services are built once here and shared through AppState.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let dispatcher = build_dispatcher(config);
    let schemes = build_scheme_registry(config).context("failed to build scheme validators")?;

    let source: Arc<dyn ClaimsSource> = match &config.claims.valkey_url {
        Some(url) => Arc::new(
            ValkeyClaimsSource::connect(url, config.claims.key_prefix.clone())
                .await
                .context("failed to connect claims store")?,
        ),
        None => Arc::new(StaticClaimsSource::new(
            config
                .claims
                .static_roles
                .iter()
                .map(|role| Claim::new(ROLE_CLAIM, role.as_str()))
                .collect(),
        )),
    };
    tracing::info!(source = source.name(), "claims source ready");

    let claims = ClaimsEnrichmentCache::new(source, clock.clone(), config.claims.fetch_timeout);
    let issuer = build_local_issuer(config, clock);

    Ok(AppState::new(
        Arc::new(dispatcher),
        Arc::new(schemes),
        claims,
        Arc::new(issuer),
        config.claims.failure_policy,
    ))
}

fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .nest("/api", api::routes(state.clone()))
        .with_state(state);

    middleware::http::apply(router)
}
