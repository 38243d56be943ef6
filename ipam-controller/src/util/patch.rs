use super::MANAGER_NAME;
use ipam_types::*;
use kube::{
    Api, Client, Error,
    api::{Patch, PatchParams, Resource},
    core::ClusterResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// Returns a mutable reference to the resource's status object, the way
/// `kube`'s generated status subresource types always need an explicit
/// "start from empty" step since `status` itself is optional on the wire.
pub trait Object<S> {
    fn mut_status(&mut self) -> &mut S;
}

impl Object<NetworkStatus> for Network {
    fn mut_status(&mut self) -> &mut NetworkStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl Object<GkeNetworkParamSetStatus> for GKENetworkParamSet {
    fn mut_status(&mut self) -> &mut GkeNetworkParamSetStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl Object<NodeTopologyStatus> for NodeTopology {
    fn mut_status(&mut self) -> &mut NodeTopologyStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

/// Patches `instance`'s status subresource with the result of applying `f`
/// to a clone, computing a JSON patch so unrelated concurrent status writers
/// are not clobbered. Only issues a request if `f` actually changed
/// anything.
pub async fn patch_status<S, T>(
    client: Client,
    instance: &T,
    f: impl FnOnce(&mut S),
) -> Result<Option<T>, Error>
where
    S: Serialize + DeserializeOwned + PartialEq,
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource<Scope = ClusterResourceScope>
        + Object<S>
        + Serialize
        + DeserializeOwned
        + Debug,
{
    let mut modified = instance.clone();
    f(modified.mut_status());

    let patch = json_patch::diff(
        &serde_json::to_value(instance).unwrap(),
        &serde_json::to_value(&modified).unwrap(),
    );
    if patch.0.is_empty() {
        return Ok(None);
    }

    let name = instance.meta().name.as_deref().unwrap();
    let api: Api<T> = Api::all(client);
    let updated = api
        .patch_status(name, &PatchParams::apply(MANAGER_NAME), &Patch::Json::<T>(patch))
        .await?;
    Ok(Some(updated))
}

/// Patches `instance`'s spec with the result of applying `f` to a clone.
/// Spec writes are a separate commit from status writes per the
/// status-then-spec ordering contract (spec.md §4.4.7).
pub async fn patch_spec<T>(
    client: Client,
    instance: &T,
    f: impl FnOnce(&mut T),
) -> Result<Option<T>, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone + Resource<Scope = ClusterResourceScope> + Serialize + DeserializeOwned + Debug + PartialEq,
{
    let mut modified = instance.clone();
    f(&mut modified);
    if &modified == instance {
        return Ok(None);
    }

    let name = instance.meta().name.as_deref().unwrap();
    let api: Api<T> = Api::all(client);
    let updated = api
        .replace(name, &Default::default(), &modified)
        .await?;
    Ok(Some(updated))
}

pub const FINALIZER: &str = "networking.gke.io/gke-network-paramset-controller";

pub fn has_finalizer<T: Resource>(obj: &T) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == FINALIZER))
}

pub fn add_finalizer<T: Resource<DynamicType = ()>>(obj: &mut T) -> bool {
    let finalizers = obj.meta_mut().finalizers.get_or_insert_with(Vec::new);
    if finalizers.iter().any(|f| f == FINALIZER) {
        return false;
    }
    finalizers.push(FINALIZER.to_string());
    true
}

pub fn remove_finalizer<T: Resource<DynamicType = ()>>(obj: &mut T) -> bool {
    let Some(finalizers) = obj.meta_mut().finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != FINALIZER);
    finalizers.len() != before
}
