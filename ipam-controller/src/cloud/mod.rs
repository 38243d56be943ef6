//! Read-only façade over the cloud IaaS (spec.md §4.2). Every method must be
//! safe to call concurrently; no method ever mutates cloud state.

mod gce;
mod types;

pub use gce::GceReadAdapter;
pub use types::*;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error, Clone)]
pub enum CloudError {
    #[error("not found")]
    NotFound,
    #[error("transient cloud error: {0}")]
    Transient(String),
}

impl CloudError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound)
    }
}

#[async_trait]
pub trait CloudReadAdapter: Send + Sync {
    async fn instance_by_provider_id(&self, provider_id: &str) -> Result<Instance, CloudError>;

    async fn subnetwork(&self, region: &str, name: &str) -> Result<Subnetwork, CloudError>;

    async fn network(&self, name: &str) -> Result<CloudNetwork, CloudError>;

    /// Self-link of the cluster's default VPC.
    fn network_url(&self) -> &str;

    /// Self-link of the cluster's default subnet.
    fn subnetwork_url(&self) -> &str;

    /// Region the cluster's nodes live in.
    fn region(&self) -> &str;

    /// Whether the cluster's VPC lives in another project; when true,
    /// VPC-existence checks in the param-set validator are skipped.
    fn on_shared_vpc(&self) -> bool;
}

/// Derives the /112 pod range GKE carves out of a NIC's single assigned
/// IPv6 address (spec.md §4.2 `ipv6Address`).
pub fn ipv6_slash_112(nic: &NetworkInterface) -> Option<String> {
    let addr = nic.ipv6_address.as_ref()?;
    let ip: std::net::Ipv6Addr = addr.split('/').next()?.parse().ok()?;
    let net = ipnet::Ipv6Net::new(ip, 112).ok()?.trunc();
    Some(net.to_string())
}

/// Extracts the last path segment of a cloud self-link, e.g.
/// `.../networks/my-vpc` -> `my-vpc`. Used everywhere a NIC's full URL needs
/// comparing against a param-set's short name.
pub fn short_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_takes_last_segment() {
        assert_eq!(
            short_name("https://compute.googleapis.com/compute/v1/projects/p/global/networks/my-vpc"),
            "my-vpc"
        );
        assert_eq!(short_name("my-vpc"), "my-vpc");
    }

    #[test]
    fn ipv6_slash_112_truncates_to_prefix() {
        let nic = NetworkInterface {
            ipv6_address: Some("2001:db9::110".to_string()),
            ..Default::default()
        };
        assert_eq!(ipv6_slash_112(&nic).as_deref(), Some("2001:db9::/112"));
    }

    #[test]
    fn ipv6_slash_112_absent_when_no_address() {
        let nic = NetworkInterface::default();
        assert_eq!(ipv6_slash_112(&nic), None);
    }
}
