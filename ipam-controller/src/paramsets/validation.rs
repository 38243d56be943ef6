//! Validation predicates (spec.md §4.4.2): each returns a `ValidationResult`
//! carrying the GKE-stable reason string published on the condition, never
//! retried as a queue error — an invalid object simply stays unready until
//! its spec or the cloud state it depends on changes.

use chrono::{DateTime, Utc};

use ipam_types::{GkeNetworkParamSetSpec, NetworkType};

use crate::cloud::{CloudReadAdapter, Subnetwork};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: &'static str,
    pub message: String,
}

fn ok() -> ValidationResult {
    ValidationResult { valid: true, reason: "Ready", message: String::new() }
}

fn invalid(reason: &'static str, message: impl Into<String>) -> ValidationResult {
    ValidationResult { valid: false, reason, message: message.into() }
}

/// spec.md §4.4.2(a): the subnet the param-set names must actually exist.
pub async fn validate_subnet(
    cloud: &dyn CloudReadAdapter,
    region: &str,
    spec: &GkeNetworkParamSetSpec,
) -> (ValidationResult, Option<Subnetwork>) {
    if spec.vpc_subnet.is_empty() {
        return (invalid("SubnetNotFound", "spec.vpcSubnet is empty"), None);
    }
    match cloud.subnetwork(region, &spec.vpc_subnet).await {
        Ok(subnet) => (ok(), Some(subnet)),
        Err(err) => (
            invalid("SubnetNotFound", format!("subnet {} not found: {err}", spec.vpc_subnet)),
            None,
        ),
    }
}

/// A sibling param-set visible during the device-mode collision check
/// (spec.md §4.4.2b): only VPC, subnet and creation time matter.
pub struct Sibling<'a> {
    pub name: &'a str,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub vpc: &'a str,
    pub subnet: &'a str,
    pub device_mode: bool,
}

/// spec.md §4.4.2(b). `self_created` is this param-set's own creation
/// timestamp; `siblings` excludes `self_name`.
#[allow(clippy::too_many_arguments)]
pub async fn validate_params(
    cloud: &dyn CloudReadAdapter,
    spec: &GkeNetworkParamSetSpec,
    subnet: Option<&Subnetwork>,
    default_vpc_short_name: &str,
    self_name: &str,
    self_created: Option<DateTime<Utc>>,
    siblings: &[Sibling<'_>],
) -> ValidationResult {
    if spec.vpc.is_empty() {
        return invalid("VPCNotFound", "spec.vpc is empty");
    }
    if !cloud.on_shared_vpc()
        && let Err(err) = cloud.network(&spec.vpc).await
    {
        return invalid("VPCNotFound", format!("VPC {} not found: {err}", spec.vpc));
    }

    let has_ranges = spec.pod_ipv4_ranges.as_ref().is_some_and(|r| !r.range_names.is_empty());
    let has_device_mode = spec.device_mode.is_some();

    if has_ranges && has_device_mode {
        return invalid(
            "DeviceModeCantBeUsedWithSecondaryRange",
            "podIPv4Ranges and deviceMode are mutually exclusive",
        );
    }
    if !has_ranges && !has_device_mode {
        return invalid(
            "SecondaryRangeAndDeviceModeUnspecified",
            "exactly one of podIPv4Ranges or deviceMode must be set",
        );
    }

    if has_ranges {
        let range_names = &spec.pod_ipv4_ranges.as_ref().unwrap().range_names;
        let Some(subnet) = subnet else {
            return invalid("SecondaryRangeNotFound", "subnet not resolved");
        };
        for name in range_names {
            if subnet.secondary_range(name).is_none() {
                return invalid(
                    "SecondaryRangeNotFound",
                    format!("secondary range {name} not found on subnet {}", subnet.name),
                );
            }
        }
    }

    if has_device_mode {
        if spec.vpc == default_vpc_short_name {
            return invalid("DeviceModeCantUseDefaultVPC", "deviceMode cannot use the cluster's default VPC");
        }
        if let Some(older) = older_conflicting_sibling(self_name, self_created, siblings, |s| s.vpc == spec.vpc) {
            return invalid(
                "DeviceModeVPCAlreadyInUse",
                format!("VPC {} already claimed by device-mode param-set {}", spec.vpc, older),
            );
        }
        if let Some(older) =
            older_conflicting_sibling(self_name, self_created, siblings, |s| s.subnet == spec.vpc_subnet)
        {
            return invalid(
                "DeviceModeSubnetAlreadyInUse",
                format!("subnet {} already claimed by device-mode param-set {}", spec.vpc_subnet, older),
            );
        }
    }

    ok()
}

/// Returns the name of an older, still-device-mode sibling that conflicts by
/// `matches`, or `None` if this param-set is the oldest (tie-break: the
/// older param-set wins, spec.md §4.4.2b).
fn older_conflicting_sibling<'a>(
    self_name: &str,
    self_created: Option<DateTime<Utc>>,
    siblings: &'a [Sibling<'a>],
    matches: impl Fn(&Sibling<'a>) -> bool,
) -> Option<&'a str> {
    siblings
        .iter()
        .filter(|s| s.name != self_name && s.device_mode && matches(s))
        .find(|s| match (s.creation_timestamp, self_created) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        })
        .map(|s| s.name)
}

/// spec.md §4.4.2(c): Network type <-> param-set shape cross-validation.
pub fn cross_validate(network_type: NetworkType, spec: &GkeNetworkParamSetSpec) -> ValidationResult {
    match network_type {
        NetworkType::L3 => {
            if spec.pod_ipv4_ranges.as_ref().is_some_and(|r| !r.range_names.is_empty()) {
                ok()
            } else {
                invalid("L3SecondaryMissing", "L3 network requires a non-empty podIPv4Ranges")
            }
        }
        NetworkType::Device => {
            if spec.device_mode.is_some() {
                ok()
            } else {
                invalid("DeviceModeMissing", "Device network requires deviceMode to be set")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipam_types::SecondaryRangeNames;

    fn spec(vpc: &str, subnet: &str, device_mode: Option<&str>, ranges: Vec<&str>) -> GkeNetworkParamSetSpec {
        GkeNetworkParamSetSpec {
            vpc: vpc.into(),
            vpc_subnet: subnet.into(),
            device_mode: device_mode.map(String::from),
            pod_ipv4_ranges: if ranges.is_empty() {
                None
            } else {
                Some(SecondaryRangeNames { range_names: ranges.into_iter().map(String::from).collect() })
            },
            network_attachment: None,
        }
    }

    #[test]
    fn cross_validate_l3_requires_ranges() {
        let r = cross_validate(NetworkType::L3, &spec("v", "s", None, vec![]));
        assert!(!r.valid);
        assert_eq!(r.reason, "L3SecondaryMissing");
        let r = cross_validate(NetworkType::L3, &spec("v", "s", None, vec!["a"]));
        assert!(r.valid);
    }

    #[test]
    fn cross_validate_device_requires_device_mode() {
        let r = cross_validate(NetworkType::Device, &spec("v", "s", None, vec![]));
        assert!(!r.valid);
        assert_eq!(r.reason, "DeviceModeMissing");
        let r = cross_validate(NetworkType::Device, &spec("v", "s", Some("NetDevice"), vec![]));
        assert!(r.valid);
    }

    #[test]
    fn older_conflicting_sibling_picks_earlier_creation() {
        use chrono::TimeZone;
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let siblings = vec![Sibling {
            name: "dev-a",
            creation_timestamp: Some(older),
            vpc: "shared-vpc",
            subnet: "shared-subnet",
            device_mode: true,
        }];
        let conflict = older_conflicting_sibling("dev-b", Some(newer), &siblings, |s| s.vpc == "shared-vpc");
        assert_eq!(conflict, Some("dev-a"));
        // The older one sees no conflict from a newer sibling.
        let none = older_conflicting_sibling("dev-a", Some(older), &siblings, |s| s.vpc == "shared-vpc");
        assert_eq!(none, None);
    }
}
