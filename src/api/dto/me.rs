use serde::Serialize;

use crate::services::auth::Claim;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub is_logged: bool,
    pub name: Option<String>,
    pub scheme: Option<String>,
    pub roles: Vec<String>,
    pub claims: Vec<Claim>,
}
