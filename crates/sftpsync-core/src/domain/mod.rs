//! Domain types shared across the pipeline
//!
//! - Path containment and normalisation for profile contexts
//! - Domain-specific error types

pub mod errors;
pub mod paths;

pub use errors::DomainError;
pub use paths::{absolutize, expand_tilde, relative_to_context};
