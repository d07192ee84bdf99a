//! Catchpy core library.
//!
//! Pure domain logic for the annotation service: no database, no async,
//! no I/O. Provides:
//!
//! - The two-way AnnotatorJS / catcha format converter (`convert`)
//! - Per-media selector encoding and decoding (`selector`)
//! - JSON-Schema plus semantic validation and the permission predicate
//!   (`validate`)
//! - Typed accessors over the raw catcha document (`document`)
//! - Closed media / target / purpose enums (`media`)

pub mod convert;
pub mod document;
pub mod error;
pub mod media;
pub mod selector;
pub mod types;
pub mod validate;
