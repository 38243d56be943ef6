use std::time::Duration;

#[cfg(feature = "metrics")]
pub mod metrics;
pub mod conditions;
pub mod patch;

pub(crate) mod colors;

mod error;

pub use error::*;

/// The default interval for requeuing a managed resource when nothing else
/// forces an earlier reconciliation.
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Name of the Kubernetes field manager used for server-side apply / patch
/// calls made by this controller.
pub(crate) const MANAGER_NAME: &str = "gke-ipam-controller";

/// Per-key retry budget before a work queue drops a key and surfaces a
/// runtime error (spec.md §4.3/§4.6).
pub(crate) const MAX_RETRIES: u32 = 5;

/// Moves a node's contribution to `multinetwork_node_total{network}` from
/// its old set of matched networks to its new one (spec.md §4.6).
#[cfg(feature = "metrics")]
pub fn metrics_move_multinetwork(
    old: &[crate::nodes::annotations::NorthInterface],
    new: &[crate::nodes::annotations::NorthInterface],
) {
    use std::collections::HashSet;
    let old_set: HashSet<&str> = old.iter().map(|n| n.network.as_str()).collect();
    let new_set: HashSet<&str> = new.iter().map(|n| n.network.as_str()).collect();
    for removed in old_set.difference(&new_set) {
        metrics::MULTINETWORK_NODE_TOTAL.with_label_values(&[removed]).dec();
    }
    for added in new_set.difference(&old_set) {
        metrics::MULTINETWORK_NODE_TOTAL.with_label_values(&[added]).inc();
    }
}

#[cfg(not(feature = "metrics"))]
pub fn metrics_move_multinetwork(
    _old: &[crate::nodes::annotations::NorthInterface],
    _new: &[crate::nodes::annotations::NorthInterface],
) {
}
