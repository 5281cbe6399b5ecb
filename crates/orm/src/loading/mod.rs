//! Association loading - load plans and the batched eager loader

pub mod batch_loader;
pub mod eager_loader;
pub mod plan;

pub use eager_loader::EagerLoader;
pub use plan::{LoadNode, LoadPlan};
