pub mod dispatch;
pub mod factory;
pub mod local_issuer;
pub mod principal;
pub mod scheme;
pub mod validator;

pub use dispatch::SchemeDispatcher;
pub use factory::{build_dispatcher, build_local_issuer, build_scheme_registry};
pub use local_issuer::LocalTokenIssuer;
pub use principal::{Claim, Principal};
pub use scheme::{SchemeName, SchemeRegistry};
