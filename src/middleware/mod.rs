/*
 * Responsibility
 * - middleware の公開インターフェース
 * - auth (dispatch → validate → enrich) と HTTP 横断関心事
 */
pub mod auth;
pub mod http;
