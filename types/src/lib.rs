use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition type published on `Network.status.conditions` once the network's
/// backing parameter set and cloud state have both been observed.
pub const COND_READY: &str = "Ready";
pub const COND_PARAMS_READY: &str = "ParamsReady";

/// The two historical spellings that both mean "the default network".
/// `is_default_network` is the single predicate used everywhere a
/// comparison against these needs to happen.
pub const DEFAULT_NETWORK_NAME: &str = "default";
pub const DEFAULT_NETWORK_NAME_LEGACY: &str = "pod-network";

pub fn is_default_network(name: &str) -> bool {
    name == DEFAULT_NETWORK_NAME || name == DEFAULT_NETWORK_NAME_LEGACY
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum NetworkType {
    #[default]
    L3,
    Device,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::L3 => write!(f, "L3"),
            NetworkType::Device => write!(f, "Device"),
        }
    }
}

/// A weak {group, kind, name} reference from a `Network` to its parameter
/// bundle. Neither side owns the other; `kind` is compared case-insensitively.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ParametersRef {
    pub group: String,
    pub kind: String,
    pub name: String,
}

impl ParametersRef {
    pub fn kind_matches(&self, kind: &str) -> bool {
        self.kind.eq_ignore_ascii_case(kind)
    }
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "networking.gke.io",
    version = "v1",
    kind = "Network",
    plural = "networks",
    derive = "PartialEq",
    status = "NetworkStatus",
    printcolumn = "{\"jsonPath\": \".spec.type\", \"name\": \"TYPE\", \"type\": \"string\" }"
)]
#[kube(derive = "Default")]
pub struct NetworkSpec {
    #[serde(rename = "type")]
    pub type_: NetworkType,
    #[serde(rename = "parametersRef", default, skip_serializing_if = "Option::is_none")]
    pub parameters_ref: Option<ParametersRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NetworkStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl NetworkStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_ready(&self) -> bool {
        self.condition(COND_READY).is_some_and(|c| c.status == "True")
    }
}

/// `podIPv4Ranges` selects named secondary ranges on the parameter set's
/// subnet to draw pod IPs from; absent/empty means Device mode instead.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SecondaryRangeNames {
    #[serde(rename = "rangeNames", default)]
    pub range_names: Vec<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "networking.gke.io",
    version = "v1",
    kind = "GKENetworkParamSet",
    plural = "gkenetworkparamsets",
    derive = "PartialEq",
    status = "GkeNetworkParamSetStatus",
    printcolumn = "{\"jsonPath\": \".spec.vpc\", \"name\": \"VPC\", \"type\": \"string\" }",
    printcolumn = "{\"jsonPath\": \".spec.vpcSubnet\", \"name\": \"SUBNET\", \"type\": \"string\" }"
)]
#[kube(derive = "Default")]
pub struct GkeNetworkParamSetSpec {
    pub vpc: String,
    #[serde(rename = "vpcSubnet")]
    pub vpc_subnet: String,
    #[serde(rename = "deviceMode", default, skip_serializing_if = "Option::is_none")]
    pub device_mode: Option<String>,
    #[serde(rename = "podIPv4Ranges", default, skip_serializing_if = "Option::is_none")]
    pub pod_ipv4_ranges: Option<SecondaryRangeNames>,
    #[serde(rename = "networkAttachment", default, skip_serializing_if = "Option::is_none")]
    pub network_attachment: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PodCidrs {
    #[serde(rename = "cidrBlocks", default)]
    pub cidr_blocks: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct GkeNetworkParamSetStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(rename = "podCIDRs", default)]
    pub pod_cidrs: PodCidrs,
    #[serde(rename = "networkName", default, skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
}

impl GkeNetworkParamSetStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_ready(&self) -> bool {
        self.condition(COND_READY).is_some_and(|c| c.status == "True")
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NodeSubnet {
    pub name: String,
    #[serde(rename = "subnetPath")]
    pub subnet_path: String,
}

/// Singleton cluster-scoped resource; only the object named `default` is
/// ever read or written.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "networking.gke.io",
    version = "v1",
    kind = "NodeTopology",
    plural = "nodetopologies",
    derive = "PartialEq",
    status = "NodeTopologyStatus"
)]
#[kube(derive = "Default")]
pub struct NodeTopologySpec {}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NodeTopologyStatus {
    #[serde(default)]
    pub subnets: Vec<NodeSubnet>,
    #[serde(default)]
    pub zones: Vec<String>,
}

pub const NODE_TOPOLOGY_NAME: &str = "default";

/// The reserved `GKENetworkParamSet` name the default network's
/// `parametersRef` points at; C4 seeds its spec from live cloud state unless
/// an operator has opted it into "Reconcile" mode (spec.md §4.4 step 3).
pub const DEFAULT_GNP_NAME: &str = "default";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_network_aliases() {
        assert!(is_default_network("default"));
        assert!(is_default_network("pod-network"));
        assert!(!is_default_network("red"));
    }

    #[test]
    fn parameters_ref_kind_is_case_insensitive() {
        let r = ParametersRef {
            group: "networking.gke.io".into(),
            kind: "GKENetworkParamSet".into(),
            name: "default".into(),
        };
        assert!(r.kind_matches("gkenetworkparamset"));
        assert!(r.kind_matches("GKENetworkParamSet"));
        assert!(!r.kind_matches("OtherKind"));
    }

    #[test]
    fn network_spec_json_tags_are_exact() {
        let spec = NetworkSpec {
            type_: NetworkType::L3,
            parameters_ref: Some(ParametersRef {
                group: "networking.gke.io".into(),
                kind: "GKENetworkParamSet".into(),
                name: "red-params".into(),
            }),
        };
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["type"], "L3");
        assert_eq!(v["parametersRef"]["name"], "red-params");
    }

    #[test]
    fn paramset_json_tags_are_exact() {
        let spec = GkeNetworkParamSetSpec {
            vpc: "my-vpc".into(),
            vpc_subnet: "my-subnet".into(),
            device_mode: None,
            pod_ipv4_ranges: Some(SecondaryRangeNames {
                range_names: vec!["red-range".into()],
            }),
            network_attachment: None,
        };
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["vpcSubnet"], "my-subnet");
        assert_eq!(v["podIPv4Ranges"]["rangeNames"][0], "red-range");
    }
}
