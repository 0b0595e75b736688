//! Security group rule diffing
//!
//! API rules may carry several sources each. They are normalized into
//! single-source [`RulePermission`] tuples so desired and existing sets can be
//! compared without touching the cloud.

use osc_client::{SecurityGroupMember, SecurityGroupRule};
use std::collections::BTreeSet;

/// Origin of the traffic a rule allows
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleSource {
    Cidr(String),
    SecurityGroup(String),
}

/// Single-source inbound permission
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RulePermission {
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    pub source: RuleSource,
}

impl RulePermission {
    pub fn tcp_port(port: i32, source: RuleSource) -> Self {
        Self {
            protocol: "tcp".to_string(),
            from_port: port,
            to_port: port,
            source,
        }
    }

    /// Split an API rule into one permission per source
    pub fn expand(rule: &SecurityGroupRule) -> Vec<RulePermission> {
        let protocol = rule.ip_protocol.to_ascii_lowercase();
        let permission = |source| RulePermission {
            protocol: protocol.clone(),
            from_port: rule.from_port_range,
            to_port: rule.to_port_range,
            source,
        };
        rule.ip_ranges
            .iter()
            .map(|cidr| permission(RuleSource::Cidr(cidr.clone())))
            .chain(
                rule.security_groups_members
                    .iter()
                    .map(|m| permission(RuleSource::SecurityGroup(m.security_group_id.clone()))),
            )
            .collect()
    }

    pub fn to_api(&self) -> SecurityGroupRule {
        let (ip_ranges, security_groups_members) = match &self.source {
            RuleSource::Cidr(cidr) => (vec![cidr.clone()], vec![]),
            RuleSource::SecurityGroup(id) => (
                vec![],
                vec![SecurityGroupMember {
                    security_group_id: id.clone(),
                    account_id: None,
                    security_group_name: None,
                }],
            ),
        };
        SecurityGroupRule {
            ip_protocol: self.protocol.clone(),
            from_port_range: self.from_port,
            to_port_range: self.to_port,
            ip_ranges,
            security_groups_members,
        }
    }

    pub fn describe(&self) -> String {
        let source = match &self.source {
            RuleSource::Cidr(cidr) => cidr.as_str(),
            RuleSource::SecurityGroup(id) => id.as_str(),
        };
        if self.from_port == self.to_port {
            format!("{}/{} from {}", self.protocol, self.from_port, source)
        } else {
            format!("{}/{}-{} from {}", self.protocol, self.from_port, self.to_port, source)
        }
    }
}

/// Normalized permission set of a list of API rules
pub fn permissions(rules: &[SecurityGroupRule]) -> BTreeSet<RulePermission> {
    rules.iter().flat_map(RulePermission::expand).collect()
}

pub fn to_api_rules<'a>(permissions: impl IntoIterator<Item = &'a RulePermission>) -> Vec<SecurityGroupRule> {
    permissions.into_iter().map(RulePermission::to_api).collect()
}

/// Changes turning an existing rule set into the desired one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDelta {
    pub to_add: Vec<RulePermission>,
    pub to_remove: Vec<RulePermission>,
}

impl RuleDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Desired minus existing, and existing minus desired; both sorted
pub fn diff(desired: &BTreeSet<RulePermission>, existing: &BTreeSet<RulePermission>) -> RuleDelta {
    RuleDelta {
        to_add: desired.difference(existing).cloned().collect(),
        to_remove: existing.difference(desired).cloned().collect(),
    }
}
