pub mod auth;
pub mod cache;
pub mod claims;
pub mod clock;
