/*
 * Responsibility
 * - Validator が生成する認証済み主体 (Principal) の型
 * - claims は追記のみ (同じ type が複数あってよい)
 */
use serde::{Deserialize, Serialize};

use crate::services::auth::scheme::SchemeName;

/// Canonical role claim type used by claim sources.
pub const ROLE_CLAIM: &str = "role";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Claim {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Identity produced by a validator.
///
/// - `scheme` is `Some` only once a validator accepted the token.
/// - `name` is read from the scheme's name claim at construction and never changes.
#[derive(Debug, Clone)]
pub struct Principal {
    scheme: Option<SchemeName>,
    name: Option<String>,
    role_claim_type: String,
    claims: Vec<Claim>,
}

impl Principal {
    #[cfg(test)]
    pub fn anonymous() -> Self {
        Self {
            scheme: None,
            name: None,
            role_claim_type: ROLE_CLAIM.to_string(),
            claims: Vec::new(),
        }
    }

    pub fn authenticated(
        scheme: SchemeName,
        name_claim_type: &str,
        role_claim_type: impl Into<String>,
        claims: Vec<Claim>,
    ) -> Self {
        let name = claims
            .iter()
            .find(|c| c.kind == name_claim_type)
            .map(|c| c.value.clone());

        Self {
            scheme: Some(scheme),
            name,
            role_claim_type: role_claim_type.into(),
            claims,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.scheme.is_some()
    }

    pub fn scheme(&self) -> Option<&SchemeName> {
        self.scheme.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// First value of the given claim type.
    pub fn find_first(&self, kind: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.value.as_str())
    }

    /// Roles carried under the scheme's role claim type or the canonical `role` type.
    pub fn roles(&self) -> Vec<&str> {
        self.claims
            .iter()
            .filter(|c| c.kind == self.role_claim_type || c.kind == ROLE_CLAIM)
            .map(|c| c.value.as_str())
            .collect()
    }

    pub fn add_claims<I>(&mut self, claims: I)
    where
        I: IntoIterator<Item = Claim>,
    {
        self.claims.extend(claims);
    }
}
