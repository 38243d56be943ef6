//! Wires the node watcher and a periodic re-sync timer into the C5 work
//! queue (spec.md §4.5 trigger sources). One sentinel key drives the whole
//! singleton object.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, ResourceExt};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use ipam_types::NODE_TOPOLOGY_NAME;

use crate::cloud::CloudReadAdapter;
use crate::queue::Queue;
use crate::util::colors::FG1;

use super::reconcile::{reconcile_topology, TopologyReconcilerContext};

async fn run_node_watch(client: Client, queue: Queue<String>) {
    let api: Api<Node> = Api::all(client);
    let mut subnets: HashMap<String, Option<String>> = HashMap::new();
    let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Applied(node)) => {
                let name = node.name_any();
                let subnet = node.labels().get(ipam_common::labels::SUBNET).cloned();
                let first_seen = !subnets.contains_key(&name);
                let previous = subnets.insert(name, subnet.clone());
                // First add always seeds the default subnet; otherwise only a
                // changed subnet label value needs a re-sync (spec.md §4.5).
                if first_seen || previous != Some(subnet) {
                    queue.add(NODE_TOPOLOGY_NAME.to_string()).await;
                }
            }
            Ok(Event::Deleted(node)) => {
                subnets.remove(&node.name_any());
                queue.add(NODE_TOPOLOGY_NAME.to_string()).await;
            }
            Ok(Event::Restarted(nodes)) => {
                for node in nodes {
                    subnets.insert(node.name_any(), node.labels().get(ipam_common::labels::SUBNET).cloned());
                }
                queue.add(NODE_TOPOLOGY_NAME.to_string()).await;
            }
            Err(err) => eprintln!("{}", format!("⚠ node watch error: {err}").yellow()),
        }
    }
}

fn spawn_resync(queue: Queue<String>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            queue.add(NODE_TOPOLOGY_NAME.to_string()).await;
        }
    })
}

pub async fn run(
    client: Client,
    cloud: Arc<dyn CloudReadAdapter>,
    resync_interval: Duration,
    workers: usize,
    shutdown: CancellationToken,
) {
    let queue: Queue<String> = Queue::new("topology");
    let ctx = Arc::new(TopologyReconcilerContext { client: client.clone(), cloud });

    println!("{}", "▶ node topology reconciler starting".color(FG1));

    let node_watch = tokio::spawn(run_node_watch(client.clone(), queue.clone()));
    let resync = spawn_resync(queue.clone(), resync_interval);

    let worker_queue = queue.clone();
    let run_workers = tokio::spawn(async move {
        worker_queue
            .run(
                workers,
                move |key: String| {
                    let ctx = ctx.clone();
                    async move { reconcile_topology(&ctx, &key).await }
                },
                |key: &String| {
                    #[cfg(feature = "metrics")]
                    crate::util::metrics::WORKQUEUE_DROPPED.with_label_values(&["topology"]).inc();
                    eprintln!("{}", format!("🛑 dropping topology key {key} after exhausting retries").red());
                },
            )
            .await;
    });

    shutdown.cancelled().await;
    queue.shutdown().await;
    node_watch.abort();
    resync.abort();
    let _ = run_workers.await;
}
