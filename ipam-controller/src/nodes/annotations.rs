//! Wire-exact shapes for the three node annotations (spec.md §4.3.3, §6).

use serde::{Deserialize, Serialize};

pub const NORTH_INTERFACES: &str = ipam_common::annotations::NORTH_INTERFACES;
pub const MULTI_NETWORK: &str = ipam_common::annotations::MULTI_NETWORK;
pub const NODE_NETWORKS: &str = ipam_common::annotations::NODE_NETWORKS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NorthInterface {
    pub network: String,
    #[serde(rename = "ipAddress")]
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiNetworkEntry {
    pub name: String,
    pub scope: String,
    pub cidrs: Vec<String>,
}

impl MultiNetworkEntry {
    pub fn host_local(name: impl Into<String>, cidrs: Vec<String>) -> Self {
        Self { name: name.into(), scope: "host-local".to_string(), cidrs }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeNetworkEntry {
    pub name: String,
}

pub fn parse_north_interfaces(raw: &str) -> Result<Vec<NorthInterface>, serde_json::Error> {
    serde_json::from_str(raw)
}

pub fn parse_node_networks(raw: &str) -> Result<Vec<NodeNetworkEntry>, serde_json::Error> {
    serde_json::from_str(raw)
}

pub fn encode<T: Serialize>(entries: &[T]) -> String {
    serde_json::to_string(entries).expect("annotation payloads are always serializable")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn north_interfaces_round_trip() {
        let entries = vec![NorthInterface { network: "red".into(), ip_address: "10.1.1.1".into() }];
        let json = encode(&entries);
        assert_eq!(json, r#"[{"network":"red","ipAddress":"10.1.1.1"}]"#);
        assert_eq!(parse_north_interfaces(&json).unwrap(), entries);
    }

    #[test]
    fn multi_network_entry_shape() {
        let entries = vec![MultiNetworkEntry::host_local("red", vec!["172.11.1.0/24".into()])];
        let json = encode(&entries);
        assert_eq!(json, r#"[{"name":"red","scope":"host-local","cidrs":["172.11.1.0/24"]}]"#);
    }

    #[test]
    fn node_networks_shape() {
        let entries = vec![NodeNetworkEntry { name: "red".into() }];
        assert_eq!(encode(&entries), r#"[{"name":"red"}]"#);
    }
}
