//! Service annotations recognized by the controller.
//!
//! All keys live under the `service.beta.kubernetes.io/` prefix. List values
//! are comma separated; blanks around items are ignored.

use crate::error::ControllerError;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Existing security group used as the ingress group
pub const SECURITY_GROUP: &str = "service.beta.kubernetes.io/osc-load-balancer-security-group";
/// Security groups attached to the load balancers without rule management
pub const EXTRA_SECURITY_GROUPS: &str = "service.beta.kubernetes.io/osc-load-balancer-extra-security-groups";
/// Role of the nodes whose security group receives the linkage rules
pub const TARGET_ROLE: &str = "service.beta.kubernetes.io/osc-load-balancer-target-role";
pub const INSTANCES: &str = "service.beta.kubernetes.io/osc-load-balancer-instances";
pub const SUBREGIONS: &str = "service.beta.kubernetes.io/osc-load-balancer-subregions";
pub const NAME: &str = "service.beta.kubernetes.io/osc-load-balancer-name";
pub const SUBNET_ID: &str = "service.beta.kubernetes.io/osc-load-balancer-subnet-id";
pub const IP_ID: &str = "service.beta.kubernetes.io/osc-load-balancer-ip-id";
pub const INTERNAL: &str = "service.beta.kubernetes.io/osc-load-balancer-internal";
/// Standard Kubernetes annotation, merged with `spec.loadBalancerSourceRanges`
pub const SOURCE_RANGES: &str = "service.beta.kubernetes.io/load-balancer-source-ranges";

pub const DEFAULT_TARGET_ROLE: &str = "worker";
pub const MAX_INSTANCES: usize = 3;

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ControllerError {
    ControllerError::InvalidAnnotation {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Raw annotation value, `None` when unset or blank
pub fn get<'a>(annotations: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    annotations
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Comma separated list; `None` when unset
pub fn list(annotations: &BTreeMap<String, String>, key: &str) -> Option<Vec<String>> {
    get(annotations, key).map(split_list)
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn boolean(annotations: &BTreeMap<String, String>, key: &str) -> Result<bool, ControllerError> {
    match get(annotations, key) {
        None => Ok(false),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(invalid(key, v, "expected true or false")),
    }
}

/// Number of load balancer instances, 1 when unset
pub fn instances(annotations: &BTreeMap<String, String>) -> Result<usize, ControllerError> {
    match get(annotations, INSTANCES) {
        None => Ok(1),
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if (1..=MAX_INSTANCES).contains(&n) => Ok(n),
            _ => Err(invalid(
                INSTANCES,
                raw,
                format!("expected an integer between 1 and {}", MAX_INSTANCES),
            )),
        },
    }
}

/// Validate an IPv4 `address/prefix` CIDR
pub fn validate_cidr(key: &str, cidr: &str) -> Result<(), ControllerError> {
    let (addr, len) = cidr
        .split_once('/')
        .ok_or_else(|| invalid(key, cidr, "expected CIDR notation address/prefix"))?;
    addr.parse::<Ipv4Addr>().map_err(|_| invalid(key, cidr, "invalid IPv4 address"))?;
    let len: u8 = len
        .parse()
        .map_err(|_| invalid(key, cidr, "invalid prefix length"))?;
    if len > 32 {
        return Err(invalid(key, cidr, "prefix length above 32"));
    }
    Ok(())
}

/// Validate a load balancer name override (LBU names: 1-32 alphanumerics or dashes)
pub fn validate_lbu_name(name: &str) -> Result<(), ControllerError> {
    let valid = !name.is_empty()
        && name.len() <= 32
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(invalid(
            NAME,
            name,
            "load balancer names are 1-32 letters, digits or inner dashes",
        ))
    }
}
