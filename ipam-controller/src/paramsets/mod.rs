//! Network Param Set Reconciler (C4, spec.md §4.4): validates
//! `GKENetworkParamSet` objects against live cloud state and keeps the
//! `Network` objects that reference them in sync.

pub mod controller;
pub mod reconcile;
pub mod validation;

pub use controller::run;
