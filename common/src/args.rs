use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct LeaderElectionArgs {
    /// Namespace the Lease object lives in; leader election and RBAC stay
    /// namespaced rather than cluster-scoped.
    #[arg(long, env = "NAMESPACE", default_value = "kube-system")]
    pub lease_namespace: String,

    /// How long a held lease is valid without renewal.
    #[arg(long, env = "LEASE_TTL_SECONDS", default_value_t = 15)]
    pub lease_ttl_seconds: u64,

    /// How often the leader renews its lease.
    #[arg(long, env = "LEASE_RENEW_SECONDS", default_value_t = 5)]
    pub lease_renew_seconds: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct MetricsArgs {
    /// Port to serve `/metrics` and `/healthz` on. 0 disables the server.
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,
}

/// Shared shape for the per-reconciler "how many workers" flags; each
/// component picks its own default per spec.md §5.
#[derive(Parser, Debug, Clone)]
pub struct WorkersArgs {
    #[arg(long, env = "NODE_WORKERS", default_value_t = 5)]
    pub node_workers: usize,

    #[arg(long, env = "PARAMSET_WORKERS", default_value_t = 5)]
    pub paramset_workers: usize,

    #[arg(long, env = "TOPOLOGY_WORKERS", default_value_t = 1)]
    pub topology_workers: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct TopologyArgs {
    /// Periodic re-sync interval that repairs drift if the `NodeTopology`
    /// object was edited externally (spec.md §4.5).
    #[arg(long, env = "TOPOLOGY_RESYNC_SECONDS", default_value_t = 300)]
    pub topology_resync_seconds: u64,
}
