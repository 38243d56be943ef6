//! Process configuration inputs (spec.md §6) and the mask-size
//! compatibility rules (§6.1). Validation failures are fatal at startup
//! (§7's "Configuration" error kind), never surfaced as a retried queue
//! error or a status condition.

use clap::Parser;

use crate::util::Error;

const DEFAULT_IPV4_MASK_SIZE: u8 = 24;
const DEFAULT_IPV6_MASK_SIZE: u8 = 64;

#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Comma-separated pod CIDR(s); one for single-stack, two for
    /// dual-stack.
    #[arg(long, env = "CLUSTER_CIDR", value_delimiter = ',')]
    pub cluster_cidr: Vec<String>,

    #[arg(long, env = "SERVICE_CIDR")]
    pub service_cidr: String,

    #[arg(long, env = "SECONDARY_SERVICE_CIDR")]
    pub secondary_service_cidr: Option<String>,

    /// Single-stack only: the node CIDR mask size, family-agnostic.
    #[arg(long, env = "NODE_CIDR_MASK_SIZE")]
    pub node_cidr_mask_size: Option<u8>,

    #[arg(long, env = "NODE_CIDR_MASK_SIZE_IPV4")]
    pub node_cidr_mask_size_ipv4: Option<u8>,

    #[arg(long, env = "NODE_CIDR_MASK_SIZE_IPV6")]
    pub node_cidr_mask_size_ipv6: Option<u8>,

    #[arg(long, env = "ENABLE_MULTI_SUBNET_CLUSTER")]
    pub enable_multi_subnet_cluster: bool,

    #[arg(long, env = "ENABLE_MULTI_NETWORKING")]
    pub enable_multi_networking: bool,

    /// Only "cloud" is implemented; anything else is a configuration error.
    #[arg(long, env = "ALLOCATOR_TYPE", default_value = "cloud")]
    pub allocator_type: String,
}

/// Resolved, validated mask sizes — what the node reconciler actually
/// consults, as opposed to the raw optional CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskSizes {
    pub ipv4: u8,
    pub ipv6: u8,
}

impl ControllerArgs {
    pub fn dual_stack(&self) -> bool {
        self.cluster_cidr.len() == 2
    }

    /// Runs every §6.1 compatibility rule, returning the resolved mask
    /// sizes on success.
    pub fn validate(&self) -> Result<MaskSizes, Error> {
        if self.cluster_cidr.is_empty() || self.cluster_cidr.len() > 2 {
            return Err(Error::Configuration(format!(
                "--cluster-cidr accepts 1 or 2 entries, got {}",
                self.cluster_cidr.len()
            )));
        }
        for cidr in &self.cluster_cidr {
            cidr.parse::<ipnet::IpNet>()
                .map_err(|e| Error::Configuration(format!("invalid --cluster-cidr {cidr:?}: {e}")))?;
        }
        self.service_cidr
            .parse::<ipnet::IpNet>()
            .map_err(|e| Error::Configuration(format!("invalid --service-cidr {:?}: {e}", self.service_cidr)))?;
        if let Some(secondary) = &self.secondary_service_cidr {
            secondary
                .parse::<ipnet::IpNet>()
                .map_err(|e| Error::Configuration(format!("invalid --secondary-service-cidr {secondary:?}: {e}")))?;
        }
        if self.allocator_type != "cloud" {
            return Err(Error::Configuration(format!(
                "allocator type {:?} is not implemented; only \"cloud\" is in-scope",
                self.allocator_type
            )));
        }

        let has_general = self.node_cidr_mask_size.is_some();
        let has_ipv4 = self.node_cidr_mask_size_ipv4.is_some();
        let has_ipv6 = self.node_cidr_mask_size_ipv6.is_some();

        if self.dual_stack() {
            if has_general {
                return Err(Error::Configuration(
                    "--node-cidr-mask-size is forbidden in dual-stack mode; use the IPv4/IPv6-specific flags"
                        .to_string(),
                ));
            }
            Ok(MaskSizes {
                ipv4: self.node_cidr_mask_size_ipv4.unwrap_or(DEFAULT_IPV4_MASK_SIZE),
                ipv6: self.node_cidr_mask_size_ipv6.unwrap_or(DEFAULT_IPV6_MASK_SIZE),
            })
        } else {
            if has_general && (has_ipv4 || has_ipv6) {
                return Err(Error::Configuration(
                    "--node-cidr-mask-size cannot be combined with the IPv4/IPv6-specific flags".to_string(),
                ));
            }
            if has_ipv4 && has_ipv6 {
                return Err(Error::Configuration(
                    "single-stack clusters take exactly one of --node-cidr-mask-size-ipv4/-ipv6, not both"
                        .to_string(),
                ));
            }
            let is_ipv6 = self.cluster_cidr[0].contains(':');
            let mask = self
                .node_cidr_mask_size
                .or(self.node_cidr_mask_size_ipv4)
                .or(self.node_cidr_mask_size_ipv6)
                .unwrap_or(if is_ipv6 { DEFAULT_IPV6_MASK_SIZE } else { DEFAULT_IPV4_MASK_SIZE });
            Ok(if is_ipv6 {
                MaskSizes { ipv4: DEFAULT_IPV4_MASK_SIZE, ipv6: mask }
            } else {
                MaskSizes { ipv4: mask, ipv6: DEFAULT_IPV6_MASK_SIZE }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cluster_cidr: Vec<&str>) -> ControllerArgs {
        ControllerArgs {
            cluster_cidr: cluster_cidr.into_iter().map(String::from).collect(),
            service_cidr: "10.0.0.0/16".to_string(),
            secondary_service_cidr: None,
            node_cidr_mask_size: None,
            node_cidr_mask_size_ipv4: None,
            node_cidr_mask_size_ipv6: None,
            enable_multi_subnet_cluster: false,
            enable_multi_networking: false,
            allocator_type: "cloud".to_string(),
        }
    }

    #[test]
    fn dual_stack_rejects_general_mask_flag() {
        let mut a = args(vec!["10.4.0.0/14", "fd00::/64"]);
        a.node_cidr_mask_size = Some(24);
        assert!(a.validate().is_err());
    }

    #[test]
    fn dual_stack_defaults_when_unset() {
        let a = args(vec!["10.4.0.0/14", "fd00::/64"]);
        let sizes = a.validate().unwrap();
        assert_eq!(sizes, MaskSizes { ipv4: 24, ipv6: 64 });
    }

    #[test]
    fn single_stack_rejects_mixing_general_and_family_flag() {
        let mut a = args(vec!["10.4.0.0/14"]);
        a.node_cidr_mask_size = Some(23);
        a.node_cidr_mask_size_ipv4 = Some(24);
        assert!(a.validate().is_err());
    }

    #[test]
    fn single_stack_accepts_general_flag_alone() {
        let mut a = args(vec!["10.4.0.0/14"]);
        a.node_cidr_mask_size = Some(23);
        let sizes = a.validate().unwrap();
        assert_eq!(sizes.ipv4, 23);
    }

    #[test]
    fn rejects_unsupported_allocator_type() {
        let mut a = args(vec!["10.4.0.0/14"]);
        a.allocator_type = "range".to_string();
        assert!(a.validate().is_err());
    }

    #[test]
    fn rejects_bad_cluster_cidr_count() {
        let a = args(vec!["10.4.0.0/14", "fd00::/64", "10.5.0.0/14"]);
        assert!(a.validate().is_err());
    }
}
