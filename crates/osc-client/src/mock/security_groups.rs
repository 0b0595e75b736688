//! Security group operations for MockOscClient
//!
//! Rules are stored one source per rule, so duplicate detection and removal
//! work on the same tuples the API compares. Every successful mutating call
//! is journaled, even when it changed nothing.

use super::helpers::{expand_rule, references_group};
use super::MockOscClient;
use crate::common::filters::ResourceFilter;
use crate::error::OscError;
use crate::models::*;

pub async fn read_security_groups(client: &MockOscClient, filter: &ResourceFilter) -> Result<Vec<SecurityGroup>, OscError> {
    client.check_failure("ReadSecurityGroups")?;
    let mut groups: Vec<SecurityGroup> = client
        .security_groups
        .lock()
        .unwrap()
        .values()
        .filter(|sg| filter.matches(*sg))
        .cloned()
        .collect();
    groups.sort_by(|a, b| a.security_group_id.cmp(&b.security_group_id));
    Ok(groups)
}

pub async fn create_security_group(client: &MockOscClient, name: &str, description: &str, net_id: Option<&str>) -> Result<SecurityGroup, OscError> {
    client.check_failure("CreateSecurityGroup")?;

    let existing = client
        .security_groups
        .lock()
        .unwrap()
        .values()
        .find(|sg| sg.security_group_name == name && sg.net_id.as_deref() == net_id)
        .cloned();
    if let Some(sg) = existing {
        return Ok(sg);
    }

    let id = format!("sg-{:08x}", client.next_id());
    let sg = SecurityGroup {
        security_group_id: id.clone(),
        security_group_name: name.to_string(),
        description: description.to_string(),
        net_id: net_id.map(str::to_string),
        account_id: "000000000000".to_string(),
        ..Default::default()
    };
    client.security_groups.lock().unwrap().insert(id.clone(), sg.clone());
    client.record("CreateSecurityGroup", &id);
    Ok(sg)
}

pub async fn delete_security_group(client: &MockOscClient, security_group_id: &str) -> Result<(), OscError> {
    client.check_failure("DeleteSecurityGroup")?;

    let referenced_by_rule = client
        .security_groups
        .lock()
        .unwrap()
        .values()
        .any(|sg| {
            sg.security_group_id != security_group_id
                && sg
                    .inbound_rules
                    .iter()
                    .chain(sg.outbound_rules.iter())
                    .any(|r| references_group(r, security_group_id))
        });
    let attached_to_lb = client
        .load_balancers
        .lock()
        .unwrap()
        .values()
        .any(|lb| lb.security_groups.iter().any(|id| id == security_group_id));
    if referenced_by_rule || attached_to_lb {
        return Err(OscError::Conflict(format!(
            "DependencyViolation: security group {} is in use",
            security_group_id
        )));
    }

    client.security_groups.lock().unwrap().remove(security_group_id);
    client.record("DeleteSecurityGroup", security_group_id);
    Ok(())
}

pub async fn create_security_group_rules(client: &MockOscClient, security_group_id: &str, flow: Flow, rules: &[SecurityGroupRule]) -> Result<(), OscError> {
    client.check_failure("CreateSecurityGroupRule")?;

    let mut groups = client.security_groups.lock().unwrap();
    let sg = groups
        .get_mut(security_group_id)
        .ok_or_else(|| OscError::NotFound(format!("Security group {} not found", security_group_id)))?;
    let stored = match flow {
        Flow::Inbound => &mut sg.inbound_rules,
        Flow::Outbound => &mut sg.outbound_rules,
    };

    for rule in rules.iter().flat_map(expand_rule) {
        if !stored.contains(&rule) {
            stored.push(rule);
        }
    }
    drop(groups);

    client.record("CreateSecurityGroupRule", security_group_id);
    Ok(())
}

pub async fn delete_security_group_rules(client: &MockOscClient, security_group_id: &str, flow: Flow, rules: &[SecurityGroupRule]) -> Result<(), OscError> {
    client.check_failure("DeleteSecurityGroupRule")?;

    let to_remove: Vec<SecurityGroupRule> = rules.iter().flat_map(expand_rule).collect();
    if let Some(sg) = client.security_groups.lock().unwrap().get_mut(security_group_id) {
        let stored = match flow {
            Flow::Inbound => &mut sg.inbound_rules,
            Flow::Outbound => &mut sg.outbound_rules,
        };
        stored.retain(|r| !to_remove.contains(r));
    }

    client.record("DeleteSecurityGroupRule", security_group_id);
    Ok(())
}
