pub mod enrichment;
pub mod source;
pub mod valkey;

pub use enrichment::ClaimsEnrichmentCache;
pub use source::{ClaimsSource, StaticClaimsSource};
pub use valkey::ValkeyClaimsSource;
