//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` (or, for operations that must join an enclosing
//! transaction, `&mut PgConnection`) as the first argument.

pub mod annotation_repo;
pub mod tag_repo;
