//! Outscale API models
//!
//! These models match the Outscale API (OAPI) JSON shapes, which use
//! PascalCase field names. Only the fields the controller reads are modeled;
//! unknown fields are ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Key/value tag attached to a cloud resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceTag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl ResourceTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Look up the value of a tag by key
pub fn tag_value<'a>(tags: &'a [ResourceTag], key: &str) -> Option<&'a str> {
    tags.iter().find(|t| t.key == key).map(|t| t.value.as_str())
}

/// Subnet model matching the OAPI `Subnet` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Subnet {
    pub subnet_id: String,
    pub net_id: String,
    pub subregion_name: String,
    pub ip_range: String,
    pub available_ips_count: u32,
    pub state: String,
    pub tags: Vec<ResourceTag>,
}

/// Route table model matching the OAPI `RouteTable` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RouteTable {
    pub route_table_id: String,
    pub net_id: String,
    pub link_route_tables: Vec<LinkRouteTable>,
    pub routes: Vec<Route>,
    pub tags: Vec<ResourceTag>,
}

/// Association between a route table and a subnet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LinkRouteTable {
    pub link_route_table_id: String,
    pub route_table_id: String,
    pub subnet_id: Option<String>,
    pub main: bool,
}

/// Single route of a route table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Route {
    pub destination_ip_range: String,
    pub gateway_id: Option<String>,
    pub nat_service_id: Option<String>,
    pub vm_id: Option<String>,
    pub state: String,
}

impl Route {
    /// Whether the route targets an internet service (`igw-…`)
    pub fn is_internet_route(&self) -> bool {
        self.gateway_id
            .as_deref()
            .is_some_and(|g| g.starts_with("igw-"))
    }
}

/// Security group model matching the OAPI `SecurityGroup` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SecurityGroup {
    pub security_group_id: String,
    pub security_group_name: String,
    pub description: String,
    pub net_id: Option<String>,
    pub account_id: String,
    pub inbound_rules: Vec<SecurityGroupRule>,
    pub outbound_rules: Vec<SecurityGroupRule>,
    pub tags: Vec<ResourceTag>,
}

/// Security group rule; one rule may carry several sources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SecurityGroupRule {
    pub ip_protocol: String,
    pub from_port_range: i32,
    pub to_port_range: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_ranges: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_groups_members: Vec<SecurityGroupMember>,
}

/// Security group referenced as the source of a rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SecurityGroupMember {
    pub security_group_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_group_name: Option<String>,
}

/// Direction of a security group rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flow {
    Inbound,
    Outbound,
}

/// VM model matching the OAPI `Vm` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Vm {
    pub vm_id: String,
    pub vm_type: String,
    pub state: String,
    pub private_dns_name: String,
    pub private_ip: String,
    pub net_id: Option<String>,
    pub subnet_id: Option<String>,
    pub placement: Placement,
    pub security_groups: Vec<SecurityGroupLight>,
    pub tags: Vec<ResourceTag>,
}

/// VM placement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Placement {
    pub subregion_name: String,
    pub tenancy: String,
}

/// Security group reference as embedded in a VM
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SecurityGroupLight {
    pub security_group_id: String,
    pub security_group_name: String,
}

/// Load balancer (LBU) model matching the OAPI `LoadBalancer` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LoadBalancer {
    pub load_balancer_name: String,
    pub load_balancer_type: String,
    pub dns_name: String,
    pub net_id: Option<String>,
    pub subnets: Vec<String>,
    pub subregion_names: Vec<String>,
    pub security_groups: Vec<String>,
    pub listeners: Vec<Listener>,
    pub backend_vm_ids: Vec<String>,
    pub public_ip: Option<String>,
    pub tags: Vec<ResourceTag>,
}

/// LBU listener (front port -> backend port)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Listener {
    pub backend_port: i32,
    pub backend_protocol: String,
    pub load_balancer_port: i32,
    pub load_balancer_protocol: String,
}

/// Request body for `CreateLoadBalancer`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateLoadBalancerRequest {
    pub load_balancer_name: String,
    /// `internet-facing` or `internal`
    pub load_balancer_type: String,
    pub listeners: Vec<Listener>,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    pub tags: Vec<ResourceTag>,
}

/// Public IP model matching the OAPI `PublicIp` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PublicIp {
    pub public_ip_id: String,
    pub public_ip: String,
    pub link_public_ip_id: Option<String>,
    pub tags: Vec<ResourceTag>,
}

/// Subregion model matching the OAPI `Subregion` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Subregion {
    pub subregion_name: String,
    pub region_name: String,
    pub state: String,
}

/// Error entry of an OAPI error body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ApiErrorDetail {
    pub code: String,
    #[serde(rename = "Type")]
    pub error_type: String,
    pub details: String,
}

/// OAPI error body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ApiErrorResponse {
    pub errors: Vec<ApiErrorDetail>,
}
