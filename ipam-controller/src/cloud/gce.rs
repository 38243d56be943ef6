use super::{CloudError, CloudNetwork, CloudReadAdapter, Instance, NetworkInterface, Subnetwork};
use async_trait::async_trait;
use serde::Deserialize;

/// Read-only REST client over the Compute Engine API. Authentication is
/// delegated entirely to the environment (a mounted workload-identity token
/// or `GOOGLE_APPLICATION_CREDENTIALS` bearer token) — minting credentials
/// is the out-of-scope exec-credential plugin's job (spec.md §1), not this
/// adapter's.
pub struct GceReadAdapter {
    http: reqwest::Client,
    base_url: String,
    project: String,
    region: String,
    network_url: String,
    subnetwork_url: String,
    shared_vpc: bool,
    token: String,
}

impl GceReadAdapter {
    pub fn new(
        project: String,
        region: String,
        network_url: String,
        subnetwork_url: String,
        shared_vpc: bool,
        token: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: ipam_common::DEFAULT_ENDPOINT.to_string(),
            project,
            region,
            network_url,
            subnetwork_url,
            shared_vpc,
            token,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, CloudError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CloudError::Transient(e.to_string()))?;
        match resp.status().as_u16() {
            404 => Err(CloudError::NotFound),
            200..=299 => resp
                .json::<T>()
                .await
                .map_err(|e| CloudError::Transient(e.to_string())),
            code if (500..600).contains(&code) => {
                Err(CloudError::Transient(format!("HTTP {code}")))
            }
            code => Err(CloudError::Transient(format!("HTTP {code}"))),
        }
    }
}

#[derive(Deserialize)]
struct GceAliasIpRange {
    #[serde(rename = "ipCidrRange")]
    ip_cidr_range: String,
    #[serde(rename = "subnetworkRangeName")]
    subnetwork_range_name: Option<String>,
}

#[derive(Deserialize)]
struct GceNetworkInterface {
    network: String,
    subnetwork: Option<String>,
    #[serde(rename = "networkAttachment")]
    network_attachment: Option<String>,
    #[serde(rename = "networkIP")]
    network_ip: String,
    #[serde(rename = "aliasIpRanges", default)]
    alias_ip_ranges: Vec<GceAliasIpRange>,
    #[serde(rename = "ipv6Address")]
    ipv6_address: Option<String>,
}

#[derive(Deserialize)]
struct GceInstance {
    name: String,
    #[serde(rename = "networkInterfaces", default)]
    network_interfaces: Vec<GceNetworkInterface>,
}

#[derive(Deserialize)]
struct GceSecondaryRange {
    #[serde(rename = "rangeName")]
    range_name: String,
    #[serde(rename = "ipCidrRange")]
    ip_cidr_range: String,
}

#[derive(Deserialize)]
struct GceSubnetwork {
    name: String,
    #[serde(rename = "ipCidrRange")]
    ip_cidr_range: String,
    #[serde(rename = "secondaryIpRanges", default)]
    secondary_ip_ranges: Vec<GceSecondaryRange>,
}

#[derive(Deserialize)]
struct GceNetwork {
    name: String,
}

/// `gce://project/location/instance-name` as minted by the cloud controller
/// manager and stamped onto `Node.spec.providerID`.
struct ProviderId<'a> {
    project: &'a str,
    location: &'a str,
    instance: &'a str,
}

fn parse_provider_id(id: &str) -> Option<ProviderId<'_>> {
    let rest = id.strip_prefix("gce://")?;
    let mut parts = rest.splitn(3, '/');
    Some(ProviderId {
        project: parts.next()?,
        location: parts.next()?,
        instance: parts.next()?,
    })
}

#[async_trait]
impl CloudReadAdapter for GceReadAdapter {
    async fn instance_by_provider_id(&self, provider_id: &str) -> Result<Instance, CloudError> {
        let id = parse_provider_id(provider_id).ok_or(CloudError::NotFound)?;
        let url = format!(
            "{}/projects/{}/zones/{}/instances/{}",
            self.base_url, id.project, id.location, id.instance
        );
        let raw: GceInstance = self.get_json(&url).await?;
        Ok(Instance {
            name: raw.name,
            network_interfaces: raw
                .network_interfaces
                .into_iter()
                .map(|nic| NetworkInterface {
                    network: nic.network,
                    subnetwork: nic.subnetwork,
                    network_attachment: nic.network_attachment,
                    network_ip: nic.network_ip,
                    alias_ip_ranges: nic
                        .alias_ip_ranges
                        .into_iter()
                        .map(|a| super::AliasIpRange {
                            ip_cidr_range: a.ip_cidr_range,
                            subnetwork_range_name: a.subnetwork_range_name,
                        })
                        .collect(),
                    ipv6_address: nic.ipv6_address,
                })
                .collect(),
        })
    }

    async fn subnetwork(&self, region: &str, name: &str) -> Result<Subnetwork, CloudError> {
        let url = format!(
            "{}/projects/{}/regions/{}/subnetworks/{}",
            self.base_url, self.project, region, name
        );
        let raw: GceSubnetwork = self.get_json(&url).await?;
        Ok(Subnetwork {
            name: raw.name,
            ip_cidr_range: raw.ip_cidr_range,
            secondary_ip_ranges: raw
                .secondary_ip_ranges
                .into_iter()
                .map(|r| super::SecondaryRange {
                    range_name: r.range_name,
                    ip_cidr_range: r.ip_cidr_range,
                })
                .collect(),
        })
    }

    async fn network(&self, name: &str) -> Result<CloudNetwork, CloudError> {
        let url = format!("{}/projects/{}/global/networks/{}", self.base_url, self.project, name);
        let raw: GceNetwork = self.get_json(&url).await?;
        Ok(CloudNetwork { name: raw.name })
    }

    fn network_url(&self) -> &str {
        &self.network_url
    }

    fn subnetwork_url(&self) -> &str {
        &self.subnetwork_url
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn on_shared_vpc(&self) -> bool {
        self.shared_vpc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_provider_id() {
        let id = parse_provider_id("gce://my-project/us-central1-a/node-1").unwrap();
        assert_eq!(id.project, "my-project");
        assert_eq!(id.location, "us-central1-a");
        assert_eq!(id.instance, "node-1");
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(parse_provider_id("my-project/us-central1-a/node-1").is_none());
    }
}
