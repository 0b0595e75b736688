//! Service intent
//!
//! Everything the reconcilers need from a `Service`, validated once: ports,
//! source ranges and the `osc-load-balancer-*` annotations.

use crate::annotations::{self, DEFAULT_TARGET_ROLE};
use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Service;
use std::collections::BTreeSet;

const DEFAULT_SOURCE_RANGE: &str = "0.0.0.0/0";
const LBU_NAME_MAX_LEN: usize = 32;

/// One exposed Service port
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortSpec {
    /// Lower-case protocol, `tcp`
    pub protocol: String,
    /// Load balancer (front) port
    pub port: i32,
    /// Backend node port
    pub node_port: i32,
}

/// Desired load balancer setup for one Service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIntent {
    pub namespace: String,
    pub name: String,
    /// `<namespace>/<name>`, stamped on created resources
    pub service_key: String,
    /// Base name of the Service's load balancers, derived from its UID
    pub load_balancer_name: String,
    pub internal: bool,
    /// Sorted, deduplicated; `0.0.0.0/0` when unset
    pub source_ranges: Vec<String>,
    pub existing_sg_id: Option<String>,
    pub extra_sg_ids: Vec<String>,
    pub target_role: String,
    pub instance_count: usize,
    pub subregions_requested: Option<Vec<String>>,
    pub names: Option<Vec<String>>,
    pub subnet_ids: Option<Vec<String>>,
    pub ip_ids: Option<Vec<String>>,
    pub ports: Vec<PortSpec>,
}

/// Default load balancer name for a Service UID (`a` + UID without dashes)
pub fn default_load_balancer_name(uid: &str) -> String {
    let mut name = format!("a{}", uid.replace('-', ""));
    name.truncate(LBU_NAME_MAX_LEN);
    name
}

impl ServiceIntent {
    /// Build the intent of a `type: LoadBalancer` Service
    pub fn from_service(service: &Service) -> Result<Self, ControllerError> {
        let meta = &service.metadata;
        let name = meta
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidService("Service missing name".to_string()))?;
        let namespace = meta.namespace.clone().unwrap_or_else(|| "default".to_string());
        let service_key = format!("{}/{}", namespace, name);
        let uid = meta.uid.as_deref().ok_or_else(|| {
            ControllerError::InvalidService(format!("Service {} has no UID", service_key))
        })?;

        let empty = Default::default();
        let a = meta.annotations.as_ref().unwrap_or(&empty);
        let spec = service.spec.as_ref().ok_or_else(|| {
            ControllerError::InvalidService(format!("Service {} has no spec", service_key))
        })?;

        let mut ranges: BTreeSet<String> = BTreeSet::new();
        for cidr in spec.load_balancer_source_ranges.iter().flatten() {
            let cidr = cidr.trim();
            annotations::validate_cidr("spec.loadBalancerSourceRanges", cidr)?;
            ranges.insert(cidr.to_string());
        }
        for cidr in annotations::list(a, annotations::SOURCE_RANGES).unwrap_or_default() {
            annotations::validate_cidr(annotations::SOURCE_RANGES, &cidr)?;
            ranges.insert(cidr);
        }
        if ranges.is_empty() {
            ranges.insert(DEFAULT_SOURCE_RANGE.to_string());
        }

        let mut ports = Vec::new();
        for p in spec.ports.iter().flatten() {
            let protocol = p.protocol.as_deref().unwrap_or("TCP");
            if !protocol.eq_ignore_ascii_case("TCP") {
                return Err(ControllerError::InvalidService(format!(
                    "Service {} port {} uses {}; load balancers only forward TCP",
                    service_key, p.port, protocol
                )));
            }
            let node_port = p.node_port.filter(|np| *np > 0).ok_or_else(|| {
                ControllerError::InvalidService(format!(
                    "Service {} port {} has no node port allocated yet",
                    service_key, p.port
                ))
            })?;
            ports.push(PortSpec {
                protocol: "tcp".to_string(),
                port: p.port,
                node_port,
            });
        }
        if ports.is_empty() {
            return Err(ControllerError::InvalidService(format!(
                "Service {} exposes no ports",
                service_key
            )));
        }
        ports.sort();
        ports.dedup();

        let names = annotations::list(a, annotations::NAME);
        for n in names.iter().flatten() {
            annotations::validate_lbu_name(n)?;
        }

        Ok(Self {
            namespace,
            name,
            load_balancer_name: default_load_balancer_name(uid),
            service_key,
            internal: annotations::boolean(a, annotations::INTERNAL)?,
            source_ranges: ranges.into_iter().collect(),
            existing_sg_id: annotations::get(a, annotations::SECURITY_GROUP).map(str::to_string),
            extra_sg_ids: annotations::list(a, annotations::EXTRA_SECURITY_GROUPS).unwrap_or_default(),
            target_role: annotations::get(a, annotations::TARGET_ROLE)
                .unwrap_or(DEFAULT_TARGET_ROLE)
                .to_string(),
            instance_count: annotations::instances(a)?,
            subregions_requested: annotations::list(a, annotations::SUBREGIONS),
            names,
            subnet_ids: annotations::list(a, annotations::SUBNET_ID),
            ip_ids: annotations::list(a, annotations::IP_ID),
            ports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_service;

    #[test]
    fn test_defaults() {
        let svc = create_test_service("web", "default", &[], &[(80, 30080)]);
        let intent = ServiceIntent::from_service(&svc).unwrap();
        assert_eq!(intent.service_key, "default/web");
        assert_eq!(intent.source_ranges, vec!["0.0.0.0/0".to_string()]);
        assert_eq!(intent.target_role, "worker");
        assert_eq!(intent.instance_count, 1);
        assert!(!intent.internal);
        assert_eq!(intent.load_balancer_name, "a0f6d3c2a9b8e47d1a5c6b7e8f901234");
        assert_eq!(intent.ports, vec![PortSpec { protocol: "tcp".to_string(), port: 80, node_port: 30080 }]);
    }

    #[test]
    fn test_annotations_are_parsed() {
        let svc = create_test_service(
            "web",
            "shop",
            &[
                (annotations::INSTANCES, "2"),
                (annotations::SUBREGIONS, "eu-west-2a,eu-west-2c"),
                (annotations::TARGET_ROLE, "edge"),
                (annotations::SECURITY_GROUP, "sg-ingress"),
                (annotations::EXTRA_SECURITY_GROUPS, "sg-x, sg-y"),
                (annotations::INTERNAL, "true"),
            ],
            &[(443, 30443)],
        );
        let intent = ServiceIntent::from_service(&svc).unwrap();
        assert_eq!(intent.instance_count, 2);
        assert_eq!(
            intent.subregions_requested,
            Some(vec!["eu-west-2a".to_string(), "eu-west-2c".to_string()])
        );
        assert_eq!(intent.target_role, "edge");
        assert_eq!(intent.existing_sg_id.as_deref(), Some("sg-ingress"));
        assert_eq!(intent.extra_sg_ids, vec!["sg-x".to_string(), "sg-y".to_string()]);
        assert!(intent.internal);
    }

    #[test]
    fn test_source_ranges_from_spec() {
        let mut svc = create_test_service("web", "default", &[], &[(80, 30080)]);
        svc.spec.as_mut().unwrap().load_balancer_source_ranges =
            Some(vec!["10.0.0.0/8".to_string(), "10.0.0.0/8".to_string()]);
        let intent = ServiceIntent::from_service(&svc).unwrap();
        assert_eq!(intent.source_ranges, vec!["10.0.0.0/8".to_string()]);
    }

    #[test]
    fn test_invalid_source_range_is_rejected() {
        let svc = create_test_service("web", "default", &[(annotations::SOURCE_RANGES, "10.0.0.0/40")], &[(80, 30080)]);
        assert!(matches!(
            ServiceIntent::from_service(&svc),
            Err(ControllerError::InvalidAnnotation { .. })
        ));
    }

    #[test]
    fn test_ipv6_source_range_is_rejected() {
        let ranges = [(annotations::SOURCE_RANGES, "2001:db8::/32")];
        let svc = create_test_service("web", "default", &ranges, &[(80, 30080)]);
        assert!(matches!(
            ServiceIntent::from_service(&svc),
            Err(ControllerError::InvalidAnnotation { .. })
        ));

        let mut svc = create_test_service("web", "default", &[], &[(80, 30080)]);
        svc.spec.as_mut().unwrap().load_balancer_source_ranges = Some(vec!["::/0".to_string()]);
        assert!(ServiceIntent::from_service(&svc).is_err());
    }

    #[test]
    fn test_missing_node_port_is_rejected() {
        let svc = create_test_service("web", "default", &[], &[(80, 0)]);
        assert!(matches!(
            ServiceIntent::from_service(&svc),
            Err(ControllerError::InvalidService(_))
        ));
    }

    #[test]
    fn test_default_name_is_bounded() {
        let name = default_load_balancer_name("0f6d3c2a-9b8e-47d1-a5c6-b7e8f9012345");
        assert_eq!(name.len(), 32);
        assert!(name.starts_with('a'));
    }
}
