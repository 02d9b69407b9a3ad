mod principal;

pub use principal::AuthenticatedPrincipal;
