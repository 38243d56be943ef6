//! Wires the param-set, network, and node watchers into the C4 work queue
//! (spec.md §4.4 trigger sources).

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, ResourceExt};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use ipam_types::{GKENetworkParamSet, Network, ParametersRef, DEFAULT_GNP_NAME};

use crate::cloud::CloudReadAdapter;
use crate::queue::Queue;
use crate::util::colors::FG1;

use super::reconcile::{reconcile_paramset, ParamSetReconcilerContext};

const PARAMSET_KIND: &str = "GKENetworkParamSet";

async fn run_paramset_watch(client: Client, queue: Queue<String>) {
    let api: Api<GKENetworkParamSet> = Api::all(client);
    let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Applied(obj)) => queue.add(obj.name_any()).await,
            Ok(Event::Deleted(obj)) => queue.add(obj.name_any()).await,
            Ok(Event::Restarted(objs)) => {
                for obj in objs {
                    queue.add(obj.name_any()).await;
                }
            }
            Err(err) => eprintln!("{}", format!("⚠ paramset watch error: {err}").yellow()),
        }
    }
}

/// Tracks each network's param-set reference so an update that changes it
/// enqueues both the old and new param-set names (spec.md §4.4 trigger
/// sources). Only references whose kind matches ours are tracked.
async fn run_network_watch(client: Client, queue: Queue<String>) {
    let api: Api<Network> = Api::all(client);
    let mut refs: HashMap<String, Option<ParametersRef>> = HashMap::new();
    let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Applied(network)) => {
                let name = network.name_any();
                let new_ref = network.spec.parameters_ref.clone().filter(|r| r.kind_matches(PARAMSET_KIND));
                let old_ref = refs.insert(name, new_ref.clone());
                if let Some(Some(old)) = &old_ref
                    && new_ref.as_ref().map(|r| &r.name) != Some(&old.name)
                {
                    queue.add(old.name.clone()).await;
                }
                if let Some(new) = &new_ref {
                    queue.add(new.name.clone()).await;
                }
            }
            Ok(Event::Deleted(network)) => {
                if let Some(Some(old)) = refs.remove(&network.name_any()) {
                    queue.add(old.name).await;
                }
            }
            Ok(Event::Restarted(networks)) => {
                for network in networks {
                    let new_ref = network.spec.parameters_ref.clone().filter(|r| r.kind_matches(PARAMSET_KIND));
                    refs.insert(network.name_any(), new_ref);
                }
            }
            Err(err) => eprintln!("{}", format!("⚠ network watch error: {err}").yellow()),
        }
    }
}

/// spec.md §4.4 trigger sources: node add/delete enqueues the default
/// param-set only when the node's pod-range label isn't already reflected
/// in its range-name list.
async fn run_node_watch(client: Client, queue: Queue<String>) {
    let nodes: Api<Node> = Api::all(client.clone());
    let paramsets: Api<GKENetworkParamSet> = Api::all(client);
    let mut stream = Box::pin(watcher::watcher(nodes, watcher::Config::default()));
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Applied(node)) | Ok(Event::Deleted(node)) => {
                maybe_enqueue_default(&paramsets, &queue, &node).await;
            }
            Ok(Event::Restarted(_)) => {}
            Err(err) => eprintln!("{}", format!("⚠ node watch error: {err}").yellow()),
        }
    }
}

async fn maybe_enqueue_default(paramsets: &Api<GKENetworkParamSet>, queue: &Queue<String>, node: &Node) {
    let Some(range) = node.labels().get(ipam_common::labels::POD_RANGE) else {
        return;
    };
    let already_present = match paramsets.get_opt(DEFAULT_GNP_NAME).await {
        Ok(Some(p)) => p.spec.pod_ipv4_ranges.as_ref().is_some_and(|r| r.range_names.iter().any(|n| n == range)),
        _ => false,
    };
    if !already_present {
        queue.add(DEFAULT_GNP_NAME.to_string()).await;
    }
}

pub async fn run(
    client: Client,
    cloud: Arc<dyn CloudReadAdapter>,
    default_ipv4_cidr: String,
    workers: usize,
    shutdown: CancellationToken,
) {
    let queue: Queue<String> = Queue::new("paramsets");
    let ctx = Arc::new(ParamSetReconcilerContext { client: client.clone(), cloud, default_ipv4_cidr });

    println!("{}", "▶ network param-set reconciler starting".color(FG1));

    let paramset_watch = tokio::spawn(run_paramset_watch(client.clone(), queue.clone()));
    let network_watch = tokio::spawn(run_network_watch(client.clone(), queue.clone()));
    let node_watch = tokio::spawn(run_node_watch(client.clone(), queue.clone()));

    let worker_queue = queue.clone();
    let run_workers = tokio::spawn(async move {
        worker_queue
            .run(
                workers,
                move |key: String| {
                    let ctx = ctx.clone();
                    async move { reconcile_paramset(&ctx, &key).await }
                },
                |key: &String| {
                    #[cfg(feature = "metrics")]
                    crate::util::metrics::WORKQUEUE_DROPPED.with_label_values(&["paramsets"]).inc();
                    eprintln!("{}", format!("🛑 dropping paramset key {key} after exhausting retries").red());
                },
            )
            .await;
    });

    shutdown.cancelled().await;
    queue.shutdown().await;
    paramset_watch.abort();
    network_watch.abort();
    node_watch.abort();
    let _ = run_workers.await;
}
