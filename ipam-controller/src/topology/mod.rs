//! Node Topology Reconciler (C5, spec.md §4.5): keeps the singleton
//! `NodeTopology` object's subnet enumeration in sync with the cluster's
//! default subnet and the subnet labels observed on nodes.

pub mod controller;
pub mod reconcile;

pub use controller::run;
