//! Node CIDR Allocator (C3, spec.md §4.3): the largest reconciler, wiring
//! node/network events into `updateCIDRAllocation`.

pub mod annotations;
pub mod capacity;
pub mod controller;
pub mod multinetwork;
pub mod reconcile;

pub use controller::run;
