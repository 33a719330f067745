//! Shared-connection lease registry
//!
//! The registry lazily opens one expensive connection, hands out leases to
//! it, and tears it down after an idle grace period once every lease has
//! been released. See [`LeaseRegistry`] for the entry point.

mod chain;
mod closer;
mod lease;
#[allow(clippy::module_inception)]
mod registry;

pub use chain::LeaseId;
pub use closer::IdleCloser;
pub use lease::Lease;
pub use registry::{create_lease_system, LeaseRegistry};
