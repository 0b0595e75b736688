//! Helper functions shared by the mock modules

use crate::models::{SecurityGroupMember, SecurityGroupRule};

/// Split a multi-source rule into one rule per source
pub fn expand_rule(rule: &SecurityGroupRule) -> Vec<SecurityGroupRule> {
    let single = |ip_ranges: Vec<String>, members: Vec<SecurityGroupMember>| SecurityGroupRule {
        ip_protocol: rule.ip_protocol.clone(),
        from_port_range: rule.from_port_range,
        to_port_range: rule.to_port_range,
        ip_ranges,
        security_groups_members: members,
    };

    let mut expanded: Vec<SecurityGroupRule> = rule
        .ip_ranges
        .iter()
        .map(|range| single(vec![range.clone()], vec![]))
        .collect();
    expanded.extend(rule.security_groups_members.iter().map(|member| {
        single(
            vec![],
            vec![SecurityGroupMember {
                security_group_id: member.security_group_id.clone(),
                account_id: None,
                security_group_name: None,
            }],
        )
    }));
    expanded
}

/// Whether a single-source rule references a security group as its source
pub fn references_group(rule: &SecurityGroupRule, security_group_id: &str) -> bool {
    rule.security_groups_members
        .iter()
        .any(|m| m.security_group_id == security_group_id)
}
