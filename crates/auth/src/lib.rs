//! `stockwise-auth` — bearer token verification and the claims a request acts under.
//!
//! No HTTP and no storage here; the API layer turns verified claims into
//! request context.

pub mod claims;
pub mod jwt;
pub mod roles;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator, TokenError};
pub use roles::Role;
