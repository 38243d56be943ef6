//! `reconcileTopology` (spec.md §4.5): keeps the singleton `NodeTopology`
//! object's subnet list in sync with the cluster's default subnet plus every
//! distinct subnet label value observed across nodes.

use std::collections::BTreeSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::api::Api;

use ipam_types::{NodeSubnet, NodeTopology, NODE_TOPOLOGY_NAME};

use crate::cloud::CloudReadAdapter;
use crate::util::patch::patch_status;
use crate::util::Error;

pub struct TopologyReconcilerContext {
    pub client: kube::Client,
    pub cloud: Arc<dyn CloudReadAdapter>,
}

/// Splits a cloud self-link into its path prefix and trailing short name,
/// e.g. `.../subnetworks/my-subnet` -> (`.../subnetworks`, `my-subnet`).
fn split_url(url: &str) -> (&str, &str) {
    match url.rsplit_once('/') {
        Some((prefix, name)) => (prefix, name),
        None => ("", url),
    }
}

pub async fn reconcile_topology(ctx: &TopologyReconcilerContext, _key: &str) -> Result<(), Error> {
    let (default_prefix, default_name) = split_url(ctx.cloud.subnetwork_url());

    let api: Api<NodeTopology> = Api::all(ctx.client.clone());
    let Some(topology) = api.get_opt(NODE_TOPOLOGY_NAME).await? else {
        return Err(Error::UserInput(format!(
            "NodeTopology {NODE_TOPOLOGY_NAME} does not exist; it must be pre-created"
        )));
    };

    let mut desired_names: BTreeSet<String> = BTreeSet::new();
    desired_names.insert(default_name.to_string());

    let nodes: Api<Node> = Api::all(ctx.client.clone());
    for node in nodes.list(&Default::default()).await?.items {
        if let Some(subnet) = node.labels().get(ipam_common::labels::SUBNET) {
            desired_names.insert(subnet.clone());
        }
    }

    let existing_names: BTreeSet<String> = topology
        .status
        .as_ref()
        .map(|s| s.subnets.iter().map(|s| s.name.clone()).collect())
        .unwrap_or_default();

    if existing_names == desired_names {
        return Ok(());
    }

    let subnets: Vec<NodeSubnet> = desired_names
        .into_iter()
        .map(|name| {
            let subnet_path = if name == default_name {
                ctx.cloud.subnetwork_url().to_string()
            } else {
                format!("{default_prefix}/{name}")
            };
            NodeSubnet { name, subnet_path }
        })
        .collect();

    patch_status(ctx.client.clone(), &topology, |status| {
        status.subnets = subnets;
    })
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_url_separates_prefix_and_name() {
        let (prefix, name) = split_url("https://compute.googleapis.com/compute/v1/projects/p/regions/r/subnetworks/default");
        assert_eq!(name, "default");
        assert_eq!(prefix, "https://compute.googleapis.com/compute/v1/projects/p/regions/r/subnetworks");
    }

    #[test]
    fn split_url_handles_bare_name() {
        let (prefix, name) = split_url("default");
        assert_eq!(prefix, "");
        assert_eq!(name, "default");
    }
}
