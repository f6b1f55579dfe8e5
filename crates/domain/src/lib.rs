//! Domain types for the Orglens policy snapshot collector.

#![forbid(unsafe_code)]

mod policy;
mod resource;

pub use policy::{Binding, PolicyRow, PrincipalKind, aggregate_bindings};
pub use resource::{ResourceKind, ResourceRef};
