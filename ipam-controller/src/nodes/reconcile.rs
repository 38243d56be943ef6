//! `updateCIDRAllocation` (spec.md §4.3 steps 1-10): the Node CIDR Allocator's
//! per-key reconcile function.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, NodeCondition};
use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use owo_colors::OwoColorize;
use serde_json::json;

use ipam_common::{annotations, capacity_key, labels};
use ipam_types::{GKENetworkParamSet, Network};

use crate::cloud::CloudReadAdapter;
use crate::util::{metrics_move_multinetwork, Error, MANAGER_NAME};

use super::annotations::{encode, parse_north_interfaces, NodeNetworkEntry, NorthInterface};
use super::capacity::host_count;
use super::multinetwork::{extract, ResolvedNetwork};

pub struct NodeReconcilerContext {
    pub client: kube::Client,
    pub cloud: Arc<dyn CloudReadAdapter>,
    pub dual_stack: bool,
}

/// Networks and their joined param-sets, as read from the shared informer
/// caches. Built fresh for every reconcile — reads are O(1) in-memory, not
/// round trips (spec.md §5).
pub async fn load_resolved_networks(client: &kube::Client) -> Result<Vec<ResolvedNetwork>, Error> {
    let networks: Api<Network> = Api::all(client.clone());
    let paramsets: Api<GKENetworkParamSet> = Api::all(client.clone());
    let paramsets = paramsets.list(&Default::default()).await?;
    let mut resolved = Vec::new();
    for network in networks.list(&Default::default()).await?.items {
        if network.meta().deletion_timestamp.is_some() {
            continue;
        }
        let Some(status) = &network.status else { continue };
        if !status.is_ready() {
            continue;
        }
        let Some(pref) = &network.spec.parameters_ref else { continue };
        if !pref.kind_matches("GKENetworkParamSet") {
            continue;
        }
        let Some(paramset) = paramsets.items.iter().find(|p| p.name_any() == pref.name) else {
            continue;
        };
        resolved.push(ResolvedNetwork {
            name: network.name_any(),
            network_type: network.spec.type_,
            vpc: paramset.spec.vpc.clone(),
            subnet: paramset.spec.vpc_subnet.clone(),
            network_attachment: paramset.spec.network_attachment.clone(),
            device_mode: paramset.spec.device_mode.clone(),
            pod_ipv4_range_names: paramset
                .spec
                .pod_ipv4_ranges
                .as_ref()
                .map(|r| r.range_names.clone())
                .unwrap_or_default(),
        });
    }
    Ok(resolved)
}

pub async fn update_cidr_allocation(ctx: &NodeReconcilerContext, node_name: &str) -> Result<(), Error> {
    let api: Api<Node> = Api::all(ctx.client.clone());

    // 1. Read node. Absent node is a successful no-op — the cloud owns the release.
    let Some(node) = api.get_opt(node_name).await? else {
        return Ok(());
    };

    // 2. provider-id must be set.
    let provider_id = node
        .spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .ok_or_else(|| Error::MissingProviderId(node_name.to_string()))?;

    // 3. Fetch the cloud instance.
    let instance = match ctx.cloud.instance_by_provider_id(provider_id).await {
        Ok(instance) => instance,
        Err(err) => {
            eprintln!(
                "{}",
                format!("⚠ CIDRNotAvailable for node {node_name}: cloud lookup failed: {err}").yellow()
            );
            return Err(err.into());
        }
    };

    // 4. No NICs, or the only NIC has no alias ranges.
    let no_alias_ranges = instance.network_interfaces.len() == 1
        && instance.network_interfaces[0].alias_ip_ranges.is_empty();
    if instance.network_interfaces.is_empty() || no_alias_ranges {
        eprintln!(
            "{}",
            format!("⚠ CIDRNotAvailable for node {node_name}: instance has no usable NICs").yellow()
        );
        return Err(Error::UserInput(format!("node {node_name} cloud instance has no alias ranges")));
    }

    // 6. Range extraction.
    let (primary_ranges, north_interfaces, multi_network, capacity) =
        if instance.network_interfaces.len() == 1 && instance.network_interfaces[0].alias_ip_ranges.len() == 1 {
            let nic = &instance.network_interfaces[0];
            let mut ranges = vec![nic.alias_ip_ranges[0].ip_cidr_range.clone()];
            if ctx.dual_stack {
                if let Some(v6) = crate::cloud::ipv6_slash_112(nic) {
                    ranges.push(v6);
                }
            }
            (ranges, Vec::new(), Vec::new(), BTreeMap::new())
        } else {
            let networks = load_resolved_networks(&ctx.client).await?;
            let extraction = extract(&instance.network_interfaces, &networks, ctx.dual_stack)?;
            (extraction.primary_ranges, extraction.north_interfaces, extraction.multi_network, extraction.capacity)
        };

    // 7. Truncate to at most two ranges (IPv4 + IPv6); parse-validate.
    let ranges: Vec<String> = primary_ranges.into_iter().take(2).collect();
    for r in &ranges {
        host_count(r)?; // parse-validates as a side effect
    }

    let existing_primary = node.spec.as_ref().and_then(|s| s.pod_cidr.clone());
    let existing_secondary = node
        .spec
        .as_ref()
        .map(|s| s.pod_cidrs.clone().unwrap_or_default())
        .unwrap_or_default();
    let new_primary = ranges.first().cloned();
    let annotations_changed = annotations_need_update(&node, &north_interfaces, &multi_network);
    let condition_not_false = !node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|cs| cs.iter().find(|c| c.type_ == "NetworkUnavailable"))
        .map(|c| c.status == "False")
        .unwrap_or(false);

    // 8. Already identical and nothing else to do: return success.
    if existing_primary == new_primary && existing_secondary == ranges && !annotations_changed && !condition_not_false {
        return Ok(());
    }

    // 9. Primary range reassignment is still written, but the failure event
    // is only emitted if the write below actually fails.
    let reassigned = match (&existing_primary, &new_primary) {
        (Some(old), Some(new)) if old != new => Some(old.clone()),
        _ => None,
    };

    // 10a. Patch spec.podCIDR[s].
    if existing_primary != new_primary || existing_secondary != ranges {
        let mut spec_patch = json!({});
        if let Some(primary) = &new_primary {
            spec_patch["podCIDR"] = json!(primary);
        }
        spec_patch["podCIDRs"] = json!(ranges);
        let result = api
            .patch(
                node_name,
                &PatchParams::apply(MANAGER_NAME),
                &Patch::Merge(json!({ "spec": spec_patch })),
            )
            .await;
        if let Err(err) = result {
            if let Some(old) = &reassigned {
                eprintln!(
                    "{}",
                    format!(
                        "🛑 CIDRAssignmentFailed for node {node_name}: primary range reassignment from {old} to {} failed to write: {err}",
                        new_primary.as_deref().unwrap_or("<none>")
                    )
                    .red()
                );
            }
            return Err(err.into());
        }
        if let Some(old) = &reassigned {
            eprintln!(
                "{}",
                format!(
                    "⚠ node {node_name} primary range reassigned from {old} to {} (invariant violation, overwriting anyway)",
                    new_primary.as_deref().unwrap_or("<none>")
                )
                .yellow()
            );
        }
    }

    // 10b. Patch the NetworkUnavailable condition.
    let condition = NodeCondition {
        type_: "NetworkUnavailable".to_string(),
        status: "False".to_string(),
        reason: Some("RouteCreated".to_string()),
        message: Some("node CIDR assigned".to_string()),
        last_transition_time: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now())),
        last_heartbeat_time: None,
    };
    api.patch_status(
        node_name,
        &PatchParams::apply(MANAGER_NAME),
        &Patch::Merge(json!({ "status": { "conditions": [condition] } })),
    )
    .await?;

    // 10c. Annotations (strategic merge) and capacity (JSON patch) only when changed.
    if annotations_changed {
        let mut ann = BTreeMap::new();
        ann.insert(annotations::NORTH_INTERFACES.to_string(), encode(&north_interfaces));
        ann.insert(annotations::MULTI_NETWORK.to_string(), encode(&multi_network));
        api.patch(
            node_name,
            &PatchParams::apply(MANAGER_NAME),
            &Patch::Merge(json!({ "metadata": { "annotations": ann } })),
        )
        .await?;

        let old_networks = node
            .annotations()
            .get(annotations::NORTH_INTERFACES)
            .and_then(|raw| parse_north_interfaces(raw).ok())
            .unwrap_or_default();
        metrics_move_multinetwork(&old_networks, &north_interfaces);

        let capacity_ops: Vec<serde_json::Value> = capacity
            .iter()
            .map(|(network_name, count)| {
                json!({
                    "op": "add",
                    "path": format!("/status/capacity/{}", capacity_key(network_name).replace('/', "~1")),
                    "value": count.to_string(),
                })
            })
            .collect();
        if !capacity_ops.is_empty() {
            let patch: json_patch::Patch = serde_json::from_value(json!(capacity_ops))?;
            api.patch_status(node_name, &PatchParams::apply(MANAGER_NAME), &Patch::Json::<Node>(patch))
                .await?;
        }
    }

    Ok(())
}

fn annotations_need_update(node: &Node, north: &[NorthInterface], multi: &[super::annotations::MultiNetworkEntry]) -> bool {
    let current_north = node
        .annotations()
        .get(annotations::NORTH_INTERFACES)
        .and_then(|raw| parse_north_interfaces(raw).ok())
        .unwrap_or_default();
    let current_multi_raw = node.annotations().get(annotations::MULTI_NETWORK).cloned().unwrap_or_default();
    current_north != north || current_multi_raw != encode(multi)
}

/// Parses the node-networks annotation (read-only input, spec.md §6) for use
/// by trigger-source change detection in the controller wiring.
pub fn parse_node_networks(node: &Node) -> Vec<NodeNetworkEntry> {
    node.annotations()
        .get(annotations::NODE_NETWORKS)
        .and_then(|raw| super::annotations::parse_node_networks(raw).ok())
        .unwrap_or_default()
}

pub fn subnet_label(node: &Node) -> Option<&str> {
    node.labels().get(labels::SUBNET).map(|s| s.as_str())
}

pub fn pod_range_label(node: &Node) -> Option<&str> {
    node.labels().get(labels::POD_RANGE).map(|s| s.as_str())
}
