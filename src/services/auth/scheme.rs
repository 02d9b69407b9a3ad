//! Authentication scheme names and the scheme → validator registry.
//!
//! The dispatcher only ever produces a `SchemeName`; turning that name into
//! behaviour is the registry's job.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::services::auth::validator::TokenValidator;

pub const EXTERNAL_PROVIDER: &str = "ExternalProvider";
pub const LOCAL_BEARER: &str = "LocalBearer";

/// Symbolic name of a downstream validator (e.g. `"LocalBearer"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemeName(Arc<str>);

impl SchemeName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Default)]
pub struct SchemeRegistry {
    validators: HashMap<SchemeName, Arc<dyn TokenValidator>>,
}

impl fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeRegistry")
            .field("schemes", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the validator owning `scheme`.
    pub fn register(mut self, scheme: SchemeName, validator: Arc<dyn TokenValidator>) -> Self {
        self.validators.insert(scheme, validator);
        self
    }

    pub fn resolve(&self, scheme: &SchemeName) -> Option<Arc<dyn TokenValidator>> {
        self.validators.get(scheme).cloned()
    }
}
