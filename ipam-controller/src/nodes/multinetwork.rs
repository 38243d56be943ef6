//! Multi-network range extraction (spec.md §4.3.1): maps a node's cloud NICs
//! onto the set of `Network`/`GKENetworkParamSet` pairs it participates in.

use std::collections::BTreeMap;

use ipam_types::{is_default_network, NetworkType};

use crate::cloud::{short_name, NetworkInterface};
use crate::util::Error;

use super::annotations::{MultiNetworkEntry, NorthInterface};
use super::capacity::host_count;

/// A `Network` already joined with its referenced `GKENetworkParamSet`,
/// shaped for matching against cloud NICs. Built by the reconciler from the
/// shared informer caches before calling `extract`.
#[derive(Debug, Clone)]
pub struct ResolvedNetwork {
    pub name: String,
    pub network_type: NetworkType,
    pub vpc: String,
    pub subnet: String,
    pub network_attachment: Option<String>,
    pub device_mode: Option<String>,
    pub pod_ipv4_range_names: Vec<String>,
}

impl ResolvedNetwork {
    fn is_default(&self) -> bool {
        is_default_network(&self.name)
    }

    fn matches(&self, nic: &NetworkInterface) -> bool {
        if let Some(attachment) = &self.network_attachment {
            return nic.network_attachment.as_deref() == Some(attachment.as_str());
        }
        short_name(&nic.network) == self.vpc
            && nic.subnetwork.as_deref().map(short_name) == Some(self.subnet.as_str())
    }
}

pub struct Extraction {
    /// Default network's CIDRs, IPv4 first then optionally IPv6.
    pub primary_ranges: Vec<String>,
    pub north_interfaces: Vec<NorthInterface>,
    pub multi_network: Vec<MultiNetworkEntry>,
    pub capacity: BTreeMap<String, u64>,
}

/// Runs the per-NIC matching pass described in spec.md §4.3.1 across every
/// candidate network. `networks` must already exclude terminating (deletion
/// timestamp set) and non-Ready networks — the reconciler filters those
/// before calling in.
pub fn extract(
    nics: &[NetworkInterface],
    networks: &[ResolvedNetwork],
    dual_stack: bool,
) -> Result<Extraction, Error> {
    let mut primary_ranges = Vec::new();
    let mut north_interfaces = Vec::new();
    let mut multi_network = Vec::new();
    let mut capacity: BTreeMap<String, u64> = BTreeMap::new();

    for network in networks {
        for nic in nics {
            if !network.matches(nic) {
                continue;
            }

            if network.is_default() {
                if let Some(primary) = primary_alias_range(nic) {
                    primary_ranges.push(primary.to_string());
                }
                if dual_stack {
                    if let Some(v6) = crate::cloud::ipv6_slash_112(nic) {
                        primary_ranges.push(v6);
                    }
                }
                continue;
            }

            let mut matched_cidr: Option<String> = None;
            if !network.pod_ipv4_range_names.is_empty() {
                let found = network
                    .pod_ipv4_range_names
                    .iter()
                    .find_map(|name| alias_range_named(nic, name));
                match found {
                    Some(cidr) => matched_cidr = Some(cidr.to_string()),
                    None if network.network_type == NetworkType::L3 => continue,
                    None => {}
                }
            } else if network.device_mode.is_some() && network.network_type == NetworkType::L3 {
                matched_cidr = Some(format!("{}/32", nic.network_ip));
            }

            north_interfaces.push(NorthInterface {
                network: network.name.clone(),
                ip_address: nic.network_ip.clone(),
            });

            if let Some(cidr) = matched_cidr {
                let count = host_count(&cidr)?;
                *capacity.entry(network.name.clone()).or_insert(0) += count;
                multi_network.push(MultiNetworkEntry::host_local(network.name.clone(), vec![cidr]));
            }
        }
    }

    Ok(Extraction { primary_ranges, north_interfaces, multi_network, capacity })
}

/// The alias range that isn't attached to a named secondary range — the one
/// the cloud carves from the subnet's primary CIDR.
fn primary_alias_range(nic: &NetworkInterface) -> Option<&str> {
    nic.alias_ip_ranges
        .iter()
        .find(|r| r.subnetwork_range_name.is_none())
        .or_else(|| nic.alias_ip_ranges.first())
        .map(|r| r.ip_cidr_range.as_str())
}

fn alias_range_named<'a>(nic: &'a NetworkInterface, name: &str) -> Option<&'a str> {
    nic.alias_ip_ranges
        .iter()
        .find(|r| r.subnetwork_range_name.as_deref() == Some(name))
        .map(|r| r.ip_cidr_range.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::AliasIpRange;

    fn nic(network: &str, subnetwork: &str, ip: &str, ranges: Vec<AliasIpRange>) -> NetworkInterface {
        NetworkInterface {
            network: format!("https://compute/.../networks/{network}"),
            subnetwork: Some(format!("https://compute/.../subnetworks/{subnetwork}")),
            network_attachment: None,
            network_ip: ip.to_string(),
            alias_ip_ranges: ranges,
            ipv6_address: None,
        }
    }

    #[test]
    fn default_network_takes_primary_alias_range() {
        let nics = vec![nic(
            "default-vpc",
            "default-subnet",
            "10.0.0.1",
            vec![AliasIpRange { ip_cidr_range: "192.168.1.0/24".into(), subnetwork_range_name: None }],
        )];
        let networks = vec![ResolvedNetwork {
            name: "default".into(),
            network_type: NetworkType::L3,
            vpc: "default-vpc".into(),
            subnet: "default-subnet".into(),
            network_attachment: None,
            device_mode: None,
            pod_ipv4_range_names: vec![],
        }];
        let result = extract(&nics, &networks, false).unwrap();
        assert_eq!(result.primary_ranges, vec!["192.168.1.0/24"]);
        assert!(result.north_interfaces.is_empty());
    }

    #[test]
    fn non_default_network_with_matching_range_name() {
        let nics = vec![nic(
            "red-vpc",
            "red-subnet",
            "10.1.1.1",
            vec![AliasIpRange {
                ip_cidr_range: "172.11.1.0/24".into(),
                subnetwork_range_name: Some("RedRangeA".into()),
            }],
        )];
        let networks = vec![ResolvedNetwork {
            name: "red".into(),
            network_type: NetworkType::L3,
            vpc: "red-vpc".into(),
            subnet: "red-subnet".into(),
            network_attachment: None,
            device_mode: None,
            pod_ipv4_range_names: vec!["RedRangeA".into()],
        }];
        let result = extract(&nics, &networks, false).unwrap();
        assert_eq!(result.north_interfaces, vec![NorthInterface { network: "red".into(), ip_address: "10.1.1.1".into() }]);
        assert_eq!(
            result.multi_network,
            vec![MultiNetworkEntry::host_local("red", vec!["172.11.1.0/24".into()])]
        );
        assert_eq!(result.capacity.get("red"), Some(&128));
    }

    #[test]
    fn l3_network_ignores_nic_with_no_matching_range_name() {
        let nics = vec![nic(
            "red-vpc",
            "red-subnet",
            "10.1.1.1",
            vec![AliasIpRange { ip_cidr_range: "172.11.1.0/24".into(), subnetwork_range_name: Some("Other".into()) }],
        )];
        let networks = vec![ResolvedNetwork {
            name: "red".into(),
            network_type: NetworkType::L3,
            vpc: "red-vpc".into(),
            subnet: "red-subnet".into(),
            network_attachment: None,
            device_mode: None,
            pod_ipv4_range_names: vec!["RedRangeA".into()],
        }];
        let result = extract(&nics, &networks, false).unwrap();
        assert!(result.north_interfaces.is_empty());
    }

    #[test]
    fn device_mode_network_attachment_emits_north_interface_only() {
        let mut nic = nic("unused", "unused", "10.2.2.2", vec![]);
        nic.network_attachment = Some("projects/p/networkAttachments/na".into());
        let networks = vec![ResolvedNetwork {
            name: "dev".into(),
            network_type: NetworkType::Device,
            vpc: String::new(),
            subnet: String::new(),
            network_attachment: Some("projects/p/networkAttachments/na".into()),
            device_mode: Some("NetDevice".into()),
            pod_ipv4_range_names: vec![],
        }];
        let result = extract(&[nic], &networks, false).unwrap();
        assert_eq!(result.north_interfaces.len(), 1);
        assert!(result.multi_network.is_empty());
        assert!(result.capacity.is_empty());
    }
}
