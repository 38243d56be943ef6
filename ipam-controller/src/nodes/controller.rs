//! Wires the node and network watchers into the C3 work queue (spec.md
//! §4.3 trigger sources, §4.3.4).

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, ResourceExt};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use ipam_types::Network;

use crate::cloud::CloudReadAdapter;
use crate::queue::Queue;
use crate::util::colors::FG1;

use super::annotations::parse_north_interfaces;
use super::reconcile::{update_cidr_allocation, NodeReconcilerContext};

#[derive(Clone, PartialEq, Eq)]
struct NodeSignature {
    primary_range_set: bool,
    network_unavailable_false: bool,
    node_networks_annotation: Option<String>,
    multinetwork_state: (String, String),
    subnet_label: Option<String>,
}

impl NodeSignature {
    fn of(node: &Node) -> Self {
        let primary_range_set = node.spec.as_ref().and_then(|s| s.pod_cidr.clone()).is_some();
        let network_unavailable_false = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|cs| cs.iter().find(|c| c.type_ == "NetworkUnavailable"))
            .map(|c| c.status == "False")
            .unwrap_or(false);
        let ann = node.annotations();
        Self {
            primary_range_set,
            network_unavailable_false,
            node_networks_annotation: ann.get(ipam_common::annotations::NODE_NETWORKS).cloned(),
            multinetwork_state: (
                ann.get(ipam_common::annotations::NORTH_INTERFACES).cloned().unwrap_or_default(),
                ann.get(ipam_common::annotations::MULTI_NETWORK).cloned().unwrap_or_default(),
            ),
            subnet_label: node.labels().get(ipam_common::labels::SUBNET).cloned(),
        }
    }

    /// Trigger source 2 (spec.md §4.3): primary unset, connectivity not
    /// restored, or any of the three annotation/label inputs changed.
    fn needs_reconcile_vs(&self, previous: &Self) -> bool {
        !self.primary_range_set
            || !self.network_unavailable_false
            || self.node_networks_annotation != previous.node_networks_annotation
            || self.multinetwork_state != previous.multinetwork_state
            || self.subnet_label != previous.subnet_label
    }
}

async fn enqueue_all_nodes(api: &Api<Node>, queue: &Queue<String>) {
    match api.list(&Default::default()).await {
        Ok(list) => {
            for node in list.items {
                queue.add(node.name_any()).await;
            }
        }
        Err(err) => eprintln!("{}", format!("⚠ failed listing nodes for network fan-out: {err}").yellow()),
    }
}

async fn enqueue_nodes_carrying_network(api: &Api<Node>, queue: &Queue<String>, network: &str) {
    let list = match api.list(&Default::default()).await {
        Ok(list) => list,
        Err(err) => {
            eprintln!("{}", format!("⚠ failed listing nodes for network fan-out: {err}").yellow());
            return;
        }
    };
    for node in list.items {
        let raw = node.annotations().get(ipam_common::annotations::NORTH_INTERFACES);
        match raw.map(|r| parse_north_interfaces(r)) {
            Some(Ok(entries)) if entries.iter().any(|e| e.network == network) => {
                queue.add(node.name_any()).await;
            }
            Some(Err(_)) => queue.add(node.name_any()).await,
            _ => {}
        }
    }
}

async fn run_node_watch(client: Client, queue: Queue<String>) {
    let api: Api<Node> = Api::all(client);
    let mut signatures: HashMap<String, NodeSignature> = HashMap::new();
    let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Applied(node)) => {
                let name = node.name_any();
                let sig = NodeSignature::of(&node);
                let changed = signatures.get(&name).map(|prev| sig.needs_reconcile_vs(prev)).unwrap_or(true);
                signatures.insert(name.clone(), sig);
                if changed {
                    queue.add(name).await;
                }
            }
            // Node delete is a no-op trigger (spec.md §4.3 source 3): the cloud owns the range.
            Ok(Event::Deleted(node)) => {
                signatures.remove(&node.name_any());
            }
            Ok(Event::Restarted(nodes)) => {
                for node in nodes {
                    let name = node.name_any();
                    signatures.insert(name.clone(), NodeSignature::of(&node));
                    queue.add(name).await;
                }
            }
            Err(err) => eprintln!("{}", format!("⚠ node watch error: {err}").yellow()),
        }
    }
}

async fn run_network_watch(client: Client, queue: Queue<String>) {
    let networks: Api<Network> = Api::all(client.clone());
    let nodes: Api<Node> = Api::all(client);
    let mut ready: HashMap<String, bool> = HashMap::new();
    let mut stream = Box::pin(watcher::watcher(networks, watcher::Config::default()));
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Applied(network)) => {
                let name = network.name_any();
                let now_ready = network.status.as_ref().map(|s| s.is_ready()).unwrap_or(false);
                let was_ready = ready.insert(name.clone(), now_ready);
                if was_ready != Some(now_ready) {
                    if was_ready.is_none() || now_ready {
                        enqueue_all_nodes(&nodes, &queue).await;
                    } else {
                        enqueue_nodes_carrying_network(&nodes, &queue, &name).await;
                    }
                }
            }
            Ok(Event::Deleted(network)) => {
                let name = network.name_any();
                ready.remove(&name);
                enqueue_nodes_carrying_network(&nodes, &queue, &name).await;
            }
            Ok(Event::Restarted(networks)) => {
                for network in networks {
                    let now_ready = network.status.as_ref().map(|s| s.is_ready()).unwrap_or(false);
                    ready.insert(network.name_any(), now_ready);
                }
            }
            Err(err) => eprintln!("{}", format!("⚠ network watch error: {err}").yellow()),
        }
    }
}

pub async fn run(
    client: Client,
    cloud: Arc<dyn CloudReadAdapter>,
    dual_stack: bool,
    workers: usize,
    shutdown: CancellationToken,
) {
    let queue: Queue<String> = Queue::new("nodes");
    let ctx = Arc::new(NodeReconcilerContext { client: client.clone(), cloud, dual_stack });

    println!("{}", "▶ node CIDR allocator starting".color(FG1));

    let node_watch = tokio::spawn(run_node_watch(client.clone(), queue.clone()));
    let network_watch = tokio::spawn(run_network_watch(client.clone(), queue.clone()));

    let worker_queue = queue.clone();
    let run_workers = tokio::spawn(async move {
        worker_queue
            .run(
                workers,
                move |key: String| {
                    let ctx = ctx.clone();
                    async move { update_cidr_allocation(&ctx, &key).await }
                },
                |key: &String| {
                    #[cfg(feature = "metrics")]
                    crate::util::metrics::WORKQUEUE_DROPPED.with_label_values(&["nodes"]).inc();
                    eprintln!("{}", format!("🛑 dropping node key {key} after exhausting retries").red());
                },
            )
            .await;
    });

    shutdown.cancelled().await;
    queue.shutdown().await;
    node_watch.abort();
    network_watch.abort();
    let _ = run_workers.await;
}
