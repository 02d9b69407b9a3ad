//! Bearer authentication for protected routes.
//!
//! 1. dispatcher picks a scheme from the raw `Authorization` header (no trust)
//! 2. the scheme's validator verifies the token and builds a `Principal`
//! 3. the claims cache appends the identity's additional claims
//! 4. the `Principal` goes into request extensions for the extractor

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::{self, Next},
    response::Response,
};

use crate::config::EnrichmentFailurePolicy;
use crate::error::AppError;
use crate::services::auth::dispatch::bearer_token;
use crate::state::AppState;

/// Require authentication on every route of `router`.
///
/// ```ignore
/// let protected = Router::new().route("/me", get(me));
/// let protected = middleware::auth::access::apply(protected, state.clone());
/// ```
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    // `route_layer` so unmatched paths stay 404 instead of 401
    router.route_layer(middleware::from_fn_with_state(state, access_middleware))
}

async fn access_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let scheme = state.dispatcher.select_scheme(authorization);

    let token = authorization
        .and_then(bearer_token)
        .ok_or(AppError::Unauthorized)?;

    let Some(validator) = state.schemes.resolve(&scheme) else {
        tracing::error!(%scheme, "no validator registered for scheme");
        return Err(AppError::Internal);
    };

    let mut principal = match validator.validate(token).await {
        Ok(principal) => principal,
        Err(err) => {
            tracing::warn!(%scheme, error = %err, "bearer token validation failed");
            return Err(AppError::Unauthorized);
        }
    };

    if let Err(err) = state.claims.enrich(&mut principal).await {
        match state.failure_policy {
            EnrichmentFailurePolicy::FailClosed => {
                tracing::warn!(%scheme, identity = ?principal.name(), error = %err, "claims enrichment failed, rejecting request");
                return Err(AppError::ServiceUnavailable);
            }
            EnrichmentFailurePolicy::Degrade => {
                tracing::warn!(%scheme, identity = ?principal.name(), error = %err, "claims enrichment failed, continuing without extra claims");
            }
        }
    }

    tracing::debug!(%scheme, identity = ?principal.name(), "request authenticated");

    // middleware → extractor への受け渡し
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}
