//! Test utilities for unit testing reconcilers
//!
//! Helpers to build Kubernetes objects, Outscale resources and a reconciler
//! backed by [`MockOscClient`].

use crate::backoff::RetryPolicy;
use crate::reconciler::scope::{role_tag, ClusterScope, NODE_NAME_TAG, OWNED, SHARED};
use crate::reconciler::Reconciler;
use k8s_openapi::api::core::v1::{Node, NodeSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use osc_client::{
    LinkRouteTable, MockOscClient, Placement, ResourceTag, Route, RouteTable, SecurityGroup,
    SecurityGroupLight, SecurityGroupMember, SecurityGroupRule, Subnet, Vm,
};
use std::collections::BTreeMap;

pub const TEST_REGION: &str = "eu-west-2";
pub const TEST_CLUSTER: &str = "c1";
pub const TEST_NET: &str = "vpc-1";
pub const TEST_SERVICE_UID: &str = "0f6d3c2a-9b8e-47d1-a5c6-b7e8f9012345";
/// Load balancer name derived from [`TEST_SERVICE_UID`]
pub const TEST_LB_NAME: &str = "a0f6d3c2a9b8e47d1a5c6b7e8f901234";

pub fn test_scope() -> ClusterScope {
    ClusterScope::new(TEST_CLUSTER, Some(TEST_NET.to_string()))
}

/// Reconciler over a mock client, retrying each call up to `attempts` times without sleeping
pub fn create_test_reconciler(mock: &MockOscClient, attempts: u32) -> Reconciler {
    Reconciler::new(mock.clone(), test_scope(), RetryPolicy::immediate(attempts))
}

pub fn tags(pairs: &[(&str, &str)]) -> Vec<ResourceTag> {
    pairs.iter().map(|(k, v)| ResourceTag::new(*k, *v)).collect()
}

fn cluster_tag() -> String {
    test_scope().cluster_tag()
}

/// `type: LoadBalancer` Service with TCP ports given as (port, node port)
pub fn create_test_service(
    name: &str,
    namespace: &str,
    annotations: &[(&str, &str)],
    ports: &[(i32, i32)],
) -> Service {
    let annotations: BTreeMap<String, String> = annotations
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(TEST_SERVICE_UID.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ports: Some(
                ports
                    .iter()
                    .map(|(port, node_port)| ServicePort {
                        name: Some(format!("p{}", port)),
                        protocol: Some("TCP".to_string()),
                        port: *port,
                        node_port: Some(*node_port),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn create_test_node(name: &str, provider_id: Option<&str>) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: provider_id.map(str::to_string),
            ..Default::default()
        }),
        status: None,
    }
}

/// Subnet of the test net tagged for the cluster, plus optional extra tag keys
pub fn create_test_subnet(id: &str, subregion: &str, extra_tag_keys: &[&str]) -> Subnet {
    let mut subnet_tags = vec![ResourceTag::new(cluster_tag(), OWNED)];
    subnet_tags.extend(extra_tag_keys.iter().map(|k| ResourceTag::new(*k, "")));
    Subnet {
        subnet_id: id.to_string(),
        net_id: TEST_NET.to_string(),
        subregion_name: subregion.to_string(),
        ip_range: "10.0.0.0/24".to_string(),
        available_ips_count: 200,
        state: "available".to_string(),
        tags: subnet_tags,
    }
}

/// Subnet tagged with `OscK8sRole/<role>` for the cluster
pub fn create_role_subnet(id: &str, subregion: &str, role: &str) -> Subnet {
    create_test_subnet(id, subregion, &[&role_tag(role)])
}

/// Route table linked to `subnet_id` with a default route to an internet service
pub fn create_public_route_table(id: &str, subnet_id: &str) -> RouteTable {
    RouteTable {
        route_table_id: id.to_string(),
        net_id: TEST_NET.to_string(),
        link_route_tables: vec![LinkRouteTable {
            link_route_table_id: format!("rtbassoc-{}", subnet_id),
            route_table_id: id.to_string(),
            subnet_id: Some(subnet_id.to_string()),
            main: false,
        }],
        routes: vec![
            Route {
                destination_ip_range: "10.0.0.0/16".to_string(),
                gateway_id: Some("local".to_string()),
                ..Default::default()
            },
            Route {
                destination_ip_range: "0.0.0.0/0".to_string(),
                gateway_id: Some("igw-0001".to_string()),
                ..Default::default()
            },
        ],
        tags: vec![],
    }
}

/// Security group of the test net carrying the cluster tag with `ownership` and extra tag keys
pub fn create_test_security_group(id: &str, name: &str, shared: bool, extra_tag_keys: &[&str]) -> SecurityGroup {
    let mut sg_tags = vec![ResourceTag::new(cluster_tag(), if shared { SHARED } else { OWNED })];
    sg_tags.extend(extra_tag_keys.iter().map(|k| ResourceTag::new(*k, "")));
    SecurityGroup {
        security_group_id: id.to_string(),
        security_group_name: name.to_string(),
        net_id: Some(TEST_NET.to_string()),
        account_id: "000000000000".to_string(),
        tags: sg_tags,
        ..Default::default()
    }
}

pub fn cidr_rule(port: i32, cidr: &str) -> SecurityGroupRule {
    SecurityGroupRule {
        ip_protocol: "tcp".to_string(),
        from_port_range: port,
        to_port_range: port,
        ip_ranges: vec![cidr.to_string()],
        security_groups_members: vec![],
    }
}

pub fn group_rule(port: i32, source_sg: &str) -> SecurityGroupRule {
    SecurityGroupRule {
        ip_protocol: "tcp".to_string(),
        from_port_range: port,
        to_port_range: port,
        ip_ranges: vec![],
        security_groups_members: vec![SecurityGroupMember {
            security_group_id: source_sg.to_string(),
            account_id: None,
            security_group_name: None,
        }],
    }
}

/// VM of the cluster named after its node
pub fn create_test_vm(id: &str, node_name: &str, subregion: &str) -> Vm {
    Vm {
        vm_id: id.to_string(),
        vm_type: "tinav5.c2r4p2".to_string(),
        state: "running".to_string(),
        private_dns_name: format!("ip-10-0-0-1.{}.compute.internal", TEST_REGION),
        private_ip: "10.0.0.1".to_string(),
        net_id: Some(TEST_NET.to_string()),
        subnet_id: Some("subnet-nodes".to_string()),
        placement: Placement {
            subregion_name: subregion.to_string(),
            tenancy: "default".to_string(),
        },
        security_groups: vec![SecurityGroupLight {
            security_group_id: "sg-node".to_string(),
            security_group_name: "worker".to_string(),
        }],
        tags: tags(&[(cluster_tag().as_str(), OWNED), (NODE_NAME_TAG, node_name)]),
    }
}
