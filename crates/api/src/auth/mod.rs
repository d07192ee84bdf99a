//! Authentication: JWT validation and claims.

pub mod jwt;
