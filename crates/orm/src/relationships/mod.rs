//! Relationships Module - relationship declarations and the registry that holds them

pub mod metadata;
pub mod registry;

// Re-export metadata system types
pub use metadata::*;
pub use registry::*;
