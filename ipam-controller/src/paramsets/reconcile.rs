//! `reconcileParamSet` (spec.md §4.4): validates a `GKENetworkParamSet`
//! against live cloud state, cross-validates it with its referencing
//! `Network`, and manages the finalizer that keeps it alive while in use.

use std::collections::BTreeSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use owo_colors::OwoColorize;
use serde_json::json;

use ipam_common::labels::POD_RANGE;
use ipam_types::{
    DEFAULT_GNP_NAME, GKENetworkParamSet, GkeNetworkParamSetSpec, Network, PodCidrs, SecondaryRangeNames,
    COND_PARAMS_READY, COND_READY,
};

use crate::cloud::{short_name, CloudReadAdapter, Subnetwork};
use crate::util::colors::FG2;
use crate::util::conditions::upsert_condition;
use crate::util::patch::{add_finalizer, remove_finalizer, Object};
use crate::util::{Error, MANAGER_NAME};

use super::validation::{cross_validate, validate_params, validate_subnet, Sibling};

pub struct ParamSetReconcilerContext {
    pub client: kube::Client,
    pub cloud: Arc<dyn CloudReadAdapter>,
    /// The cluster's configured primary IPv4 CIDR, used only to locate the
    /// default subnet's matching secondary range when seeding the default
    /// param-set (spec.md §4.4 step 3).
    pub default_ipv4_cidr: String,
}

fn is_reconcile_mode(obj: &GKENetworkParamSet) -> bool {
    obj.labels().get(ipam_common::addon::MODE_LABEL).map(String::as_str) == Some(ipam_common::addon::MODE_RECONCILE)
}

fn is_ensure_exists_mode(obj: &GKENetworkParamSet) -> bool {
    obj.labels().get(ipam_common::addon::MODE_LABEL).map(String::as_str)
        == Some(ipam_common::addon::MODE_ENSURE_EXISTS)
}

fn is_network_in_use(network: &Network) -> bool {
    network.annotations().get(ipam_common::annotations::IN_USE).map(String::as_str) == Some("true")
}

pub async fn reconcile_paramset(ctx: &ParamSetReconcilerContext, name: &str) -> Result<(), Error> {
    let api: Api<GKENetworkParamSet> = Api::all(ctx.client.clone());

    // 1. Lister Get; not-found runs the post-deletion cleanup (§4.4.4).
    let Some(original) = api.get_opt(name).await? else {
        return cleanup_deleted(ctx, name).await;
    };

    // 2. Deep-copy: mutate `working`, diff against `original` at write time.
    let mut working = original.clone();

    // 3. Default param-set seeding.
    if name == DEFAULT_GNP_NAME && !is_reconcile_mode(&working) {
        seed_default_spec(ctx, &mut working).await?;
    }

    // 4. sync().
    let (pod_range_changed, referring_network) = sync(ctx, &mut working).await?;

    // 5. A pod-range expansion invalidates the network's ParamsReady ahead
    // of the readiness re-check, so downstream observers see the expanded
    // list first (spec.md §9 open question, preserved as-is).
    if pod_range_changed && let Some(network_name) = &referring_network {
        set_network_condition(
            ctx,
            network_name,
            COND_PARAMS_READY,
            false,
            "GNPParamsNotReady",
            "default param-set's pod range list was just extended from node labels",
        )
        .await?;
    }

    // 6. Write-back: status subresource first, then the rest of the object.
    write_back(ctx, &original, &working).await?;

    Ok(())
}

async fn sync(ctx: &ParamSetReconcilerContext, working: &mut GKENetworkParamSet) -> Result<(bool, Option<String>), Error> {
    if working.meta().deletion_timestamp.is_some() {
        deletion_flow(ctx, working).await?;
        return Ok((false, None));
    }

    add_finalizer(working);

    let region = ctx.cloud.region().to_string();
    let (subnet_result, subnet) = validate_subnet(ctx.cloud.as_ref(), &region, &working.spec).await;
    upsert_condition(
        &mut working.mut_status().conditions,
        COND_READY,
        subnet_result.valid,
        subnet_result.reason,
        &subnet_result.message,
    );
    if !subnet_result.valid {
        return Ok((false, None));
    }

    let siblings_raw: Vec<GKENetworkParamSet> =
        Api::<GKENetworkParamSet>::all(ctx.client.clone()).list(&Default::default()).await?.items;
    let self_name = working.name_any();
    let siblings: Vec<Sibling<'_>> = siblings_raw
        .iter()
        .filter(|p| p.name_any() != self_name)
        .map(|p| Sibling {
            name: p.metadata.name.as_deref().unwrap_or_default(),
            creation_timestamp: p.metadata.creation_timestamp.clone().map(|t| t.0),
            vpc: &p.spec.vpc,
            subnet: &p.spec.vpc_subnet,
            device_mode: p.spec.device_mode.is_some(),
        })
        .collect();

    let default_vpc_short = short_name(ctx.cloud.network_url()).to_string();
    let param_result = validate_params(
        ctx.cloud.as_ref(),
        &working.spec,
        subnet.as_ref(),
        &default_vpc_short,
        &self_name,
        working.metadata.creation_timestamp.clone().map(|t| t.0),
        &siblings,
    )
    .await;
    upsert_condition(
        &mut working.mut_status().conditions,
        COND_READY,
        param_result.valid,
        param_result.reason,
        &param_result.message,
    );
    if !param_result.valid {
        return Ok((false, None));
    }

    let mut pod_range_changed = false;
    if self_name == DEFAULT_GNP_NAME && is_ensure_exists_mode(working) {
        pod_range_changed = extend_default_pod_ranges(ctx, working).await?;
    }

    let subnet = subnet.expect("subnet_result.valid implies subnet is Some");
    working.mut_status().pod_cidrs = PodCidrs { cidr_blocks: derive_pod_cidrs(&working.spec, &subnet) };

    let Some(network) = find_referring_network(ctx, &self_name).await? else {
        return Ok((pod_range_changed, None));
    };
    let network_name = network.name_any();

    let cross = cross_validate(network.spec.type_, &working.spec);
    set_network_condition(ctx, &network_name, COND_PARAMS_READY, cross.valid, cross.reason, &cross.message).await?;
    if cross.valid {
        working.mut_status().network_name = Some(network_name.clone());
    }

    Ok((pod_range_changed, Some(network_name)))
}

/// spec.md §4.4.3: deletion only proceeds — by removing the finalizer —
/// once no referencing network is both present and in-use.
async fn deletion_flow(ctx: &ParamSetReconcilerContext, working: &mut GKENetworkParamSet) -> Result<(), Error> {
    let Some(network_name) = working.status.as_ref().and_then(|s| s.network_name.clone()) else {
        remove_finalizer(working);
        return Ok(());
    };

    let networks: Api<Network> = Api::all(ctx.client.clone());
    match networks.get_opt(&network_name).await? {
        Some(network) => {
            let still_refers = network
                .spec
                .parameters_ref
                .as_ref()
                .is_some_and(|r| r.name == working.name_any() && r.kind_matches("GKENetworkParamSet"));
            if !still_refers || !is_network_in_use(&network) {
                remove_finalizer(working);
            } else {
                println!(
                    "{}",
                    format!("⏳ {} finalizer held: network {network_name} still in-use", working.name_any()).color(FG2)
                );
            }
        }
        None => {
            remove_finalizer(working);
        }
    }
    Ok(())
}

/// spec.md §4.4.4: the param-set was actually deleted already (Get returned
/// not-found). Any network still pointing at it gets told so.
async fn cleanup_deleted(ctx: &ParamSetReconcilerContext, name: &str) -> Result<(), Error> {
    if let Some(network) = find_referring_network(ctx, name).await? {
        set_network_condition(
            ctx,
            &network.name_any(),
            COND_PARAMS_READY,
            false,
            "GNPDeleted",
            &format!("GKENetworkParamSet {name} was deleted"),
        )
        .await?;
    }
    Ok(())
}

/// spec.md §4.4.6: at most one network is expected to reference `name`.
async fn find_referring_network(ctx: &ParamSetReconcilerContext, name: &str) -> Result<Option<Network>, Error> {
    let networks: Api<Network> = Api::all(ctx.client.clone());
    let list = networks.list(&Default::default()).await?;
    Ok(list
        .items
        .into_iter()
        .find(|n| n.spec.parameters_ref.as_ref().is_some_and(|r| r.name == name && r.kind_matches("GKENetworkParamSet"))))
}

/// spec.md §4.4.5: default param-set only. Extends `podIPv4Ranges.rangeNames`
/// with the union of every distinct pod-range label value currently observed
/// across nodes. Returns whether the list actually grew.
async fn extend_default_pod_ranges(ctx: &ParamSetReconcilerContext, working: &mut GKENetworkParamSet) -> Result<bool, Error> {
    let nodes: Api<Node> = Api::all(ctx.client.clone());
    let before: BTreeSet<String> =
        working.spec.pod_ipv4_ranges.as_ref().map(|r| r.range_names.iter().cloned().collect()).unwrap_or_default();
    let mut names = before.clone();
    for node in nodes.list(&Default::default()).await?.items {
        if let Some(range) = node.labels().get(POD_RANGE) {
            names.insert(range.clone());
        }
    }
    if names == before {
        return Ok(false);
    }
    working.spec.pod_ipv4_ranges = Some(SecondaryRangeNames { range_names: names.into_iter().collect() });
    Ok(true)
}

/// spec.md §4.4.1: Device mode publishes the subnet's primary CIDR;
/// secondary-range mode publishes the CIDRs of the named ranges.
fn derive_pod_cidrs(spec: &GkeNetworkParamSetSpec, subnet: &Subnetwork) -> Vec<String> {
    match &spec.pod_ipv4_ranges {
        Some(ranges) if !ranges.range_names.is_empty() => ranges
            .range_names
            .iter()
            .filter_map(|name| subnet.secondary_range(name))
            .map(|r| r.ip_cidr_range.clone())
            .collect(),
        _ => vec![subnet.ip_cidr_range.clone()],
    }
}

/// spec.md §4.4 step 3: seeds the default param-set's spec from the cloud's
/// own notion of "the default VPC/subnet", unless an operator has opted the
/// object into manual `Reconcile` mode.
async fn seed_default_spec(ctx: &ParamSetReconcilerContext, working: &mut GKENetworkParamSet) -> Result<(), Error> {
    let vpc = short_name(ctx.cloud.network_url()).to_string();
    let subnet_name = short_name(ctx.cloud.subnetwork_url()).to_string();
    let subnet = ctx.cloud.subnetwork(ctx.cloud.region(), &subnet_name).await?;
    let range = subnet
        .secondary_ip_ranges
        .iter()
        .find(|r| r.ip_cidr_range == ctx.default_ipv4_cidr)
        .ok_or_else(|| {
            Error::UserInput(format!(
                "no secondary range on subnet {subnet_name} matches cluster default CIDR {}",
                ctx.default_ipv4_cidr
            ))
        })?;

    working.spec = GkeNetworkParamSetSpec {
        vpc,
        vpc_subnet: subnet_name,
        device_mode: None,
        pod_ipv4_ranges: Some(SecondaryRangeNames { range_names: vec![range.range_name.clone()] }),
        network_attachment: None,
    };

    let meta_labels = working.meta_mut().labels.get_or_insert_with(Default::default);
    meta_labels.insert(ipam_common::addon::MODE_LABEL.to_string(), ipam_common::addon::MODE_ENSURE_EXISTS.to_string());
    meta_labels.insert(ipam_common::addon::COMPONENT_LABEL.to_string(), ipam_common::addon::COMPONENT_NAME.to_string());
    Ok(())
}

async fn set_network_condition(
    ctx: &ParamSetReconcilerContext,
    network_name: &str,
    type_: &str,
    valid: bool,
    reason: &str,
    message: &str,
) -> Result<(), Error> {
    let api: Api<Network> = Api::all(ctx.client.clone());
    let Some(network) = api.get_opt(network_name).await? else {
        return Ok(());
    };
    let mut status = network.status.clone().unwrap_or_default();
    let before = status.clone();
    upsert_condition(&mut status.conditions, type_, valid, reason, message);
    if status == before {
        return Ok(());
    }
    api.patch_status(network_name, &PatchParams::apply(MANAGER_NAME), &Patch::Merge(json!({ "status": status })))
        .await?;
    Ok(())
}

/// spec.md §4.4.7: status first (as a subresource patch), spec/metadata
/// second (as a regular update) — so a downstream watcher never observes a
/// spec change without the condition that authorized it.
async fn write_back(ctx: &ParamSetReconcilerContext, original: &GKENetworkParamSet, working: &GKENetworkParamSet) -> Result<(), Error> {
    let api: Api<GKENetworkParamSet> = Api::all(ctx.client.clone());
    let name = working.name_any();

    if working.status != original.status {
        api.patch_status(
            &name,
            &PatchParams::apply(MANAGER_NAME),
            &Patch::Merge(json!({ "status": working.status })),
        )
        .await?;
    }

    let metadata_changed = working.metadata.finalizers != original.metadata.finalizers
        || working.metadata.labels != original.metadata.labels
        || working.metadata.annotations != original.metadata.annotations;
    if working.spec != original.spec || metadata_changed {
        let mut to_write = working.clone();
        to_write.status = original.status.clone();
        api.replace(&name, &PostParams::default(), &to_write).await?;
    }

    update_gnp_metric(original, working);

    Ok(())
}

/// spec.md §4.6: `gnp_objects{ready,device_mode}`, decrement-old /
/// increment-new on every successful reconciliation.
#[cfg(feature = "metrics")]
fn update_gnp_metric(original: &GKENetworkParamSet, working: &GKENetworkParamSet) {
    let old = (original.status.as_ref().is_some_and(|s| s.is_ready()), original.spec.device_mode.is_some());
    let new = (working.status.as_ref().is_some_and(|s| s.is_ready()), working.spec.device_mode.is_some());
    if old == new {
        return;
    }
    crate::util::metrics::GNP_OBJECTS.with_label_values(&[&old.0.to_string(), &old.1.to_string()]).dec();
    crate::util::metrics::GNP_OBJECTS.with_label_values(&[&new.0.to_string(), &new.1.to_string()]).inc();
}

#[cfg(not(feature = "metrics"))]
fn update_gnp_metric(_original: &GKENetworkParamSet, _working: &GKENetworkParamSet) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_mode_label_is_exact() {
        let mut obj = GKENetworkParamSet::default();
        obj.meta_mut().labels = Some(
            [(ipam_common::addon::MODE_LABEL.to_string(), ipam_common::addon::MODE_RECONCILE.to_string())]
                .into_iter()
                .collect(),
        );
        assert!(is_reconcile_mode(&obj));
        assert!(!is_ensure_exists_mode(&obj));
    }

    #[test]
    fn network_in_use_requires_exact_string_true() {
        let mut network = Network::default();
        network.meta_mut().annotations = Some(
            [(ipam_common::annotations::IN_USE.to_string(), "true".to_string())].into_iter().collect(),
        );
        assert!(is_network_in_use(&network));
        network.meta_mut().annotations = Some(
            [(ipam_common::annotations::IN_USE.to_string(), "maybe".to_string())].into_iter().collect(),
        );
        assert!(!is_network_in_use(&network));
    }
}
