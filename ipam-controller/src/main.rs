use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use ipam_common::args::{LeaderElectionArgs, MetricsArgs, TopologyArgs, WorkersArgs};
use ipam_common::shutdown::shutdown_signal;

use cloud::GceReadAdapter;
use config::ControllerArgs;
use util::colors::FG1;

mod cloud;
mod config;
mod nodes;
mod paramsets;
mod queue;
mod topology;
mod util;

/// Read-only cloud adapter construction inputs (spec.md §4.2); these are the
/// process bootstrap's job (§1), not the adapter's.
#[derive(Parser, Debug, Clone)]
struct CloudArgs {
    #[arg(long, env = "GCE_PROJECT")]
    project: String,

    #[arg(long, env = "GCE_REGION")]
    region: String,

    #[arg(long, env = "GCE_NETWORK_URL")]
    network_url: String,

    #[arg(long, env = "GCE_SUBNETWORK_URL")]
    subnetwork_url: String,

    #[arg(long, env = "GCE_SHARED_VPC")]
    shared_vpc: bool,

    /// Bearer token for the Compute Engine API. In production this is
    /// minted by the out-of-scope exec-credential plugin (spec.md §1) and
    /// handed to us via the environment.
    #[arg(long, env = "GCE_TOKEN", hide_env_values = true)]
    token: String,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "ipam-controller")]
struct Cli {
    #[command(flatten)]
    controller: ControllerArgs,

    #[command(flatten)]
    cloud: CloudArgs,

    #[command(flatten)]
    workers: WorkersArgs,

    #[command(flatten)]
    topology: TopologyArgs,

    #[command(flatten)]
    leader_election: LeaderElectionArgs,

    #[command(flatten)]
    metrics: MetricsArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    ipam_common::init();
    let cli = Cli::parse();

    let mask_sizes = cli.controller.validate().map_err(|e| anyhow::anyhow!(e.to_string())).context(
        "bad controller configuration; refusing to start (spec.md §7 Configuration errors are fatal at startup)",
    )?;
    println!(
        "{}",
        format!(
            "🌱 node-cidr-mask-size resolved to ipv4=/{} ipv6=/{} (dual-stack={})",
            mask_sizes.ipv4,
            mask_sizes.ipv6,
            cli.controller.dual_stack()
        )
        .color(FG1)
    );

    let default_ipv4_cidr = cli
        .controller
        .cluster_cidr
        .iter()
        .find(|c| !c.contains(':'))
        .cloned()
        .context("no IPv4 entry in --cluster-cidr")?;

    let client = kube::Client::try_default().await.context("failed to build a Kubernetes client")?;

    #[cfg(feature = "metrics")]
    util::metrics::maybe_spawn_metrics_server(cli.metrics.metrics_port);

    let cloud: Arc<dyn cloud::CloudReadAdapter> = Arc::new(GceReadAdapter::new(
        cli.cloud.project,
        cli.cloud.region,
        cli.cloud.network_url,
        cli.cloud.subnetwork_url,
        cli.cloud.shared_vpc,
        cli.cloud.token,
    ));

    run_with_leader_election(client, cloud, cli.controller.dual_stack(), default_ipv4_cidr, cli.workers, cli.topology, cli.leader_election)
        .await
}

/// Runs the three reconcilers only while this replica holds the lease; on
/// loss of leadership (or a failure to renew) the in-flight controller task
/// is aborted and the replica returns to standby. Mirrors the production
/// controller's leader-election loop.
#[allow(clippy::too_many_arguments)]
async fn run_with_leader_election(
    client: kube::Client,
    cloud: Arc<dyn cloud::CloudReadAdapter>,
    dual_stack: bool,
    default_ipv4_cidr: String,
    workers: WorkersArgs,
    topology_args: TopologyArgs,
    leader_election: LeaderElectionArgs,
) -> Result<()> {
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("ipam-controller-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &leader_election.lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "gke-ipam-controller-lock".to_string(),
            lease_ttl: Duration::from_secs(leader_election.lease_ttl_seconds),
        },
    );

    let shutdown = CancellationToken::new();
    let shutdown_watcher = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_watcher.cancel();
    });
    ipam_common::signal_ready();

    let mut controller_task: Option<(tokio::task::JoinHandle<()>, CancellationToken)> = None;
    let mut tick = tokio::time::interval(Duration::from_secs(leader_election.lease_renew_seconds));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some((task, token)) = controller_task.take() {
                    token.cancel();
                    let _ = task.await;
                }
                println!("{}", "🛑 ipam-controller shut down gracefully".red());
                return Ok(());
            }
            _ = tick.tick() => {}
        }

        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(err) => {
                eprintln!("{}", format!("⚠ leader election renew/acquire failed: {err}").yellow());
                if let Some((task, token)) = controller_task.take() {
                    token.cancel();
                    let _ = task.await;
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!("{}", "👑 acquired leadership; starting reconcilers".green());
                let token = CancellationToken::new();
                let task = spawn_reconcilers(
                    client.clone(),
                    cloud.clone(),
                    dual_stack,
                    default_ipv4_cidr.clone(),
                    &workers,
                    &topology_args,
                    token.clone(),
                );
                controller_task = Some((task, token));
            }
        } else if let Some((task, token)) = controller_task.take() {
            println!("{}", "⏳ lost leadership; standing by".yellow());
            token.cancel();
            let _ = task.await;
        }
    }
}

fn spawn_reconcilers(
    client: kube::Client,
    cloud: Arc<dyn cloud::CloudReadAdapter>,
    dual_stack: bool,
    default_ipv4_cidr: String,
    workers: &WorkersArgs,
    topology_args: &TopologyArgs,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let node_workers = workers.node_workers;
    let paramset_workers = workers.paramset_workers;
    let topology_workers = workers.topology_workers;
    let resync_interval = Duration::from_secs(topology_args.topology_resync_seconds);

    tokio::spawn(async move {
        tokio::join!(
            nodes::run(client.clone(), cloud.clone(), dual_stack, node_workers, shutdown.clone()),
            paramsets::run(client.clone(), cloud.clone(), default_ipv4_cidr, paramset_workers, shutdown.clone()),
            topology::run(client, cloud, resync_interval, topology_workers, shutdown),
        );
    })
}
