//! Per-network host-count capacity (spec.md §4.3.2).

use crate::util::Error;
use std::net::IpAddr;

/// Computes the number of host addresses a CIDR block represents for the
/// purpose of publishing `status.capacity["networking/<name>.IP"]`.
///
/// IPv4 /31 and /32 and IPv6 /127 and /128 are point-to-point or host routes
/// and always count as 1, matching how the cloud actually hands these out
/// for Device-mode NICs.
pub fn host_count(cidr: &str) -> Result<u64, Error> {
    let (addr, prefix) = split_cidr(cidr)?;
    match addr {
        IpAddr::V4(_) => {
            if prefix > 32 {
                return Err(invalid(cidr, "IPv4 prefix length out of range"));
            }
            Ok(if prefix >= 31 { 1 } else { 1u64.checked_shl((32 - prefix) as u32).unwrap_or(u64::MAX) })
        }
        IpAddr::V6(_) => {
            if prefix > 128 {
                return Err(invalid(cidr, "IPv6 prefix length out of range"));
            }
            Ok(if prefix >= 127 {
                1
            } else {
                1u64.checked_shl((128 - prefix) as u32).unwrap_or(u64::MAX)
            })
        }
    }
}

/// Sums `host_count` across every CIDR assigned to a network, the quantity
/// published as `networking/<name>.IP`.
pub fn total_capacity(cidrs: &[String]) -> Result<u64, Error> {
    cidrs.iter().map(|c| host_count(c)).sum()
}

fn split_cidr(cidr: &str) -> Result<(IpAddr, u8), Error> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| invalid(cidr, "missing prefix length"))?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid(cidr, "unparsable address"))?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid(cidr, "unparsable prefix length"))?;
    Ok((addr, prefix))
}

fn invalid(cidr: &str, reason: &str) -> Error {
    Error::InvalidCidr {
        cidr: cidr.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_slash_24_is_256_hosts() {
        assert_eq!(host_count("192.168.1.0/24").unwrap(), 256);
    }

    #[test]
    fn ipv4_slash_25_is_128_hosts() {
        assert_eq!(host_count("172.11.1.0/25").unwrap(), 128);
    }

    #[test]
    fn ipv4_point_to_point_and_host_routes_count_one() {
        assert_eq!(host_count("10.0.0.0/31").unwrap(), 1);
        assert_eq!(host_count("10.0.0.5/32").unwrap(), 1);
    }

    #[test]
    fn ipv6_slash_112_is_65536_hosts() {
        assert_eq!(host_count("2001:db9::/112").unwrap(), 65536);
    }

    #[test]
    fn ipv6_host_and_ptp_routes_count_one() {
        assert_eq!(host_count("2001:db9::1/128").unwrap(), 1);
        assert_eq!(host_count("2001:db9::/127").unwrap(), 1);
    }

    #[test]
    fn rejects_unparsable_cidr() {
        assert!(host_count("not-a-cidr").is_err());
        assert!(host_count("192.168.1.0/40").is_err());
    }

    #[test]
    fn total_capacity_sums_multiple_cidrs() {
        let cidrs = vec!["192.168.1.0/25".to_string(), "192.168.2.0/25".to_string()];
        assert_eq!(total_capacity(&cidrs).unwrap(), 256);
    }
}
