/*
 * Responsibility
 * - GET /api/me (どちらの scheme でも認証必須)
 * - enrichment 後の Principal をそのまま返す
 */
use axum::Json;

use crate::api::{dto::me::MeResponse, extractors::AuthenticatedPrincipal};

pub async fn me(AuthenticatedPrincipal(principal): AuthenticatedPrincipal) -> Json<MeResponse> {
    Json(MeResponse {
        is_logged: principal.is_authenticated(),
        name: principal.name().map(str::to_owned),
        scheme: principal.scheme().map(|s| s.as_str().to_owned()),
        roles: principal.roles().into_iter().map(str::to_owned).collect(),
        claims: principal.claims().to_vec(),
    })
}
