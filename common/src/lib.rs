pub mod args;
pub mod shutdown;

pub const DEFAULT_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

pub fn signal_ready() {
    let _ = std::fs::write("/etc/ready", "ready");
}

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

/// Annotation and label keys read or written on core `Node` objects. The
/// namespace prefix matches the one the cloud provider reserves for its own
/// node metadata.
pub mod annotations {
    pub const NORTH_INTERFACES: &str = "networking.gke.io/north-interfaces";
    pub const MULTI_NETWORK: &str = "networking.gke.io/multi-network";
    pub const NODE_NETWORKS: &str = "networking.gke.io/node-networks";
    pub const IN_USE: &str = "networking.gke.io/in-use";
}

pub mod labels {
    pub const POD_RANGE: &str = "networking.gke.io/pod-range";
    pub const SUBNET: &str = "networking.gke.io/subnet";
}

/// `addon-manager` reconciliation-mode labels the default `GKENetworkParamSet`
/// is stamped with when C4 seeds its spec from cloud defaults (spec.md §4.4
/// step 3). A cluster operator who switches the label to `Reconcile` owns
/// the spec from then on; the controller never overwrites it again.
pub mod addon {
    pub const MODE_LABEL: &str = "addonmanager.kubernetes.io/mode";
    pub const MODE_ENSURE_EXISTS: &str = "EnsureExists";
    pub const MODE_RECONCILE: &str = "Reconcile";
    pub const COMPONENT_LABEL: &str = "k8s-app";
    pub const COMPONENT_NAME: &str = "gke-network-paramset-controller";
}

pub fn capacity_key(network_name: &str) -> String {
    format!("networking.gke.io/networks/{network_name}.IP")
}
