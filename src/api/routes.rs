/*
 * Responsibility
 * - /api の URL 構造を定義
 * - 認証が必要な範囲 (/me) にだけ access middleware を掛ける
 */
use axum::{
    Router,
    routing::{get, post},
};

use crate::api::handlers::{login::login, me::me};
use crate::middleware;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new().route("/me", get(me));
    let protected = middleware::auth::access::apply(protected, state);

    Router::new()
        .route("/auth/login", post(login))
        .merge(protected)
}
