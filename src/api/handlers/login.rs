/*
 * Responsibility
 * - POST /api/auth/login
 * - local bearer token を発行し、同じ名前の claims cache を無効化する
 */
use axum::{Json, extract::State, http::StatusCode};

use crate::api::dto::login::{LoginRequest, LoginResponse};
use crate::error::AppError;
use crate::state::AppState;

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), AppError> {
    let issued = state.issuer.issue(&req.user_name)?;

    // Next request for this identity re-reads its authorization data.
    state.claims.invalidate(req.user_name.trim());

    tracing::info!(user = %req.user_name.trim(), "local token issued");

    Ok((
        StatusCode::OK,
        Json(LoginResponse {
            access_token: issued.access_token,
            token_type: issued.token_type,
            expires_in: issued.expires_in,
        }),
    ))
}
