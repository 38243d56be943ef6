use serde::{Deserialize, Serialize};

/// A secondary CIDR attached to a NIC by the cloud ("alias IP range").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasIpRange {
    pub ip_cidr_range: String,
    /// Name of the subnet secondary range this alias was carved from, if
    /// any. Absent for aliases drawn from the subnet's primary range.
    pub subnetwork_range_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkInterface {
    /// Self-link of the VPC this NIC is attached to.
    pub network: String,
    /// Self-link of the subnet this NIC is attached to; mutually exclusive
    /// with `network_attachment`.
    pub subnetwork: Option<String>,
    pub network_attachment: Option<String>,
    pub network_ip: String,
    pub alias_ip_ranges: Vec<AliasIpRange>,
    pub ipv6_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Instance {
    pub name: String,
    pub network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryRange {
    pub range_name: String,
    pub ip_cidr_range: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnetwork {
    pub name: String,
    pub ip_cidr_range: String,
    pub secondary_ip_ranges: Vec<SecondaryRange>,
}

impl Subnetwork {
    pub fn secondary_range(&self, name: &str) -> Option<&SecondaryRange> {
        self.secondary_ip_ranges.iter().find(|r| r.range_name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudNetwork {
    pub name: String,
}
