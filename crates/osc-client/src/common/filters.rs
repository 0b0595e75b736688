//! Typed filters for OAPI `Read*` calls
//!
//! A [`ResourceFilter`] is built once and rendered into the `Filters` object
//! of the matching OAPI call. The same filter can be evaluated locally, which
//! the mock client and the client-side load balancer tag filter rely on.

use crate::models::*;
use serde_json::{Map, Value};

/// Resource families that accept a `Filters` object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Vm,
    Subnet,
    RouteTable,
    SecurityGroup,
    LoadBalancer,
    PublicIp,
}

/// Filter over resource ids, names, nets, subregions and tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    pub ids: Vec<String>,
    pub names: Vec<String>,
    pub net_ids: Vec<String>,
    pub subregion_names: Vec<String>,
    pub tag_keys: Vec<String>,
    pub tags: Vec<(String, String)>,
}

impl ResourceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    pub fn net_id(mut self, net_id: impl Into<String>) -> Self {
        self.net_ids.push(net_id.into());
        self
    }

    pub fn subregion(mut self, subregion: impl Into<String>) -> Self {
        self.subregion_names.push(subregion.into());
        self
    }

    /// Require the presence of a tag key, whatever its value
    pub fn tag_key(mut self, key: impl Into<String>) -> Self {
        self.tag_keys.push(key.into());
        self
    }

    /// Require a tag with an exact value
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Render the OAPI `Filters` object for a resource family
    pub fn to_oapi(&self, kind: FilterKind) -> Value {
        let mut filters = Map::new();
        let ids_key = match kind {
            FilterKind::Vm => "VmIds",
            FilterKind::Subnet => "SubnetIds",
            FilterKind::RouteTable => "RouteTableIds",
            FilterKind::SecurityGroup => "SecurityGroupIds",
            FilterKind::LoadBalancer => "LoadBalancerNames",
            FilterKind::PublicIp => "PublicIpIds",
        };

        let mut ids = self.ids.clone();
        if kind == FilterKind::LoadBalancer {
            ids.extend(self.names.iter().cloned());
        }
        if !ids.is_empty() {
            filters.insert(ids_key.to_string(), Value::from(ids));
        }

        if kind == FilterKind::LoadBalancer {
            // ReadLoadBalancers only filters by name; the rest is applied locally.
            return Value::Object(filters);
        }

        if kind == FilterKind::SecurityGroup && !self.names.is_empty() {
            filters.insert("SecurityGroupNames".to_string(), Value::from(self.names.clone()));
        }
        if !self.net_ids.is_empty() && kind != FilterKind::PublicIp {
            filters.insert("NetIds".to_string(), Value::from(self.net_ids.clone()));
        }
        if !self.subregion_names.is_empty() && kind == FilterKind::Subnet {
            filters.insert(
                "SubregionNames".to_string(),
                Value::from(self.subregion_names.clone()),
            );
        }
        if !self.tag_keys.is_empty() {
            filters.insert("TagKeys".to_string(), Value::from(self.tag_keys.clone()));
        }
        if !self.tags.is_empty() {
            let tags: Vec<String> = self
                .tags
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            filters.insert("Tags".to_string(), Value::from(tags));
        }

        Value::Object(filters)
    }

    /// Evaluate the filter locally
    pub fn matches<T: Filterable>(&self, item: &T) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|id| id == item.filter_id()) {
            return false;
        }
        if !self.names.is_empty() {
            match item.filter_name() {
                Some(name) if self.names.iter().any(|n| n == name) => {}
                _ => return false,
            }
        }
        if !self.net_ids.is_empty() {
            match item.filter_net_id() {
                Some(net) if self.net_ids.iter().any(|n| n == net) => {}
                _ => return false,
            }
        }
        if !self.subregion_names.is_empty() {
            match item.filter_subregion() {
                Some(sr) if self.subregion_names.iter().any(|s| s == sr) => {}
                _ => return false,
            }
        }
        let tags = item.filter_tags();
        if !self
            .tag_keys
            .iter()
            .all(|key| tags.iter().any(|t| &t.key == key))
        {
            return false;
        }
        self.tags
            .iter()
            .all(|(key, value)| tags.iter().any(|t| &t.key == key && &t.value == value))
    }
}

/// Resources a [`ResourceFilter`] can be evaluated against
pub trait Filterable {
    fn filter_id(&self) -> &str;
    fn filter_name(&self) -> Option<&str> {
        None
    }
    fn filter_net_id(&self) -> Option<&str> {
        None
    }
    fn filter_subregion(&self) -> Option<&str> {
        None
    }
    fn filter_tags(&self) -> &[ResourceTag];
}

impl Filterable for Vm {
    fn filter_id(&self) -> &str {
        &self.vm_id
    }
    fn filter_net_id(&self) -> Option<&str> {
        self.net_id.as_deref()
    }
    fn filter_subregion(&self) -> Option<&str> {
        Some(&self.placement.subregion_name)
    }
    fn filter_tags(&self) -> &[ResourceTag] {
        &self.tags
    }
}

impl Filterable for Subnet {
    fn filter_id(&self) -> &str {
        &self.subnet_id
    }
    fn filter_net_id(&self) -> Option<&str> {
        Some(&self.net_id)
    }
    fn filter_subregion(&self) -> Option<&str> {
        Some(&self.subregion_name)
    }
    fn filter_tags(&self) -> &[ResourceTag] {
        &self.tags
    }
}

impl Filterable for RouteTable {
    fn filter_id(&self) -> &str {
        &self.route_table_id
    }
    fn filter_net_id(&self) -> Option<&str> {
        Some(&self.net_id)
    }
    fn filter_tags(&self) -> &[ResourceTag] {
        &self.tags
    }
}

impl Filterable for SecurityGroup {
    fn filter_id(&self) -> &str {
        &self.security_group_id
    }
    fn filter_name(&self) -> Option<&str> {
        Some(&self.security_group_name)
    }
    fn filter_net_id(&self) -> Option<&str> {
        self.net_id.as_deref()
    }
    fn filter_tags(&self) -> &[ResourceTag] {
        &self.tags
    }
}

impl Filterable for LoadBalancer {
    fn filter_id(&self) -> &str {
        &self.load_balancer_name
    }
    fn filter_name(&self) -> Option<&str> {
        Some(&self.load_balancer_name)
    }
    fn filter_net_id(&self) -> Option<&str> {
        self.net_id.as_deref()
    }
    fn filter_tags(&self) -> &[ResourceTag] {
        &self.tags
    }
}

impl Filterable for PublicIp {
    fn filter_id(&self) -> &str {
        &self.public_ip_id
    }
    fn filter_tags(&self) -> &[ResourceTag] {
        &self.tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet(id: &str, subregion: &str, tags: &[(&str, &str)]) -> Subnet {
        Subnet {
            subnet_id: id.to_string(),
            net_id: "vpc-1".to_string(),
            subregion_name: subregion.to_string(),
            tags: tags.iter().map(|(k, v)| ResourceTag::new(*k, *v)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_renders_subnet_filters() {
        let filter = ResourceFilter::new()
            .subregion("eu-west-2a")
            .tag_key("OscK8sRole/service")
            .tag("OscK8sClusterID/c1", "owned");
        let value = filter.to_oapi(FilterKind::Subnet);
        assert_eq!(value["SubregionNames"][0], "eu-west-2a");
        assert_eq!(value["TagKeys"][0], "OscK8sRole/service");
        assert_eq!(value["Tags"][0], "OscK8sClusterID/c1=owned");
    }

    #[test]
    fn test_load_balancer_filter_only_sends_names() {
        let filter = ResourceFilter::new()
            .name("lb-1")
            .tag("OscK8sService", "default/web");
        let value = filter.to_oapi(FilterKind::LoadBalancer);
        assert_eq!(value["LoadBalancerNames"][0], "lb-1");
        assert!(value.get("Tags").is_none());
    }

    #[test]
    fn test_local_matching_on_tags_and_subregion() {
        let s = subnet("subnet-1", "eu-west-2a", &[("OscK8sRole/service", "")]);
        assert!(ResourceFilter::new().tag_key("OscK8sRole/service").matches(&s));
        assert!(!ResourceFilter::new().tag_key("OscK8sRole/loadbalancer").matches(&s));
        assert!(!ResourceFilter::new().subregion("eu-west-2b").matches(&s));
        assert!(ResourceFilter::new().id("subnet-1").matches(&s));
    }
}
