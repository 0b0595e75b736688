//! Network operations for MockOscClient
//!
//! Handles subnets, route tables, public IPs and tagging

use super::MockOscClient;
use crate::common::filters::{Filterable, ResourceFilter};
use crate::error::OscError;
use crate::models::*;

fn filtered<T: Filterable + Clone>(items: impl Iterator<Item = T>, filter: &ResourceFilter) -> Vec<T> {
    let mut out: Vec<T> = items.filter(|item| filter.matches(item)).collect();
    out.sort_by(|a, b| a.filter_id().cmp(b.filter_id()));
    out
}

pub async fn read_subnets(client: &MockOscClient, filter: &ResourceFilter) -> Result<Vec<Subnet>, OscError> {
    client.check_failure("ReadSubnets")?;
    let subnets = client.subnets.lock().unwrap();
    Ok(filtered(subnets.values().cloned(), filter))
}

pub async fn read_route_tables(client: &MockOscClient, filter: &ResourceFilter) -> Result<Vec<RouteTable>, OscError> {
    client.check_failure("ReadRouteTables")?;
    let route_tables = client.route_tables.lock().unwrap();
    Ok(filtered(route_tables.values().cloned(), filter))
}

pub async fn read_public_ips(client: &MockOscClient, filter: &ResourceFilter) -> Result<Vec<PublicIp>, OscError> {
    client.check_failure("ReadPublicIps")?;
    let public_ips = client.public_ips.lock().unwrap();
    Ok(filtered(public_ips.values().cloned(), filter))
}

fn merge_tags(existing: &mut Vec<ResourceTag>, tags: &[ResourceTag]) {
    for tag in tags {
        match existing.iter_mut().find(|t| t.key == tag.key) {
            Some(current) => current.value = tag.value.clone(),
            None => existing.push(tag.clone()),
        }
    }
}

pub async fn create_tags(client: &MockOscClient, resource_ids: &[String], tags: &[ResourceTag]) -> Result<(), OscError> {
    client.check_failure("CreateTags")?;
    for id in resource_ids {
        let found = if let Some(vm) = client.vms.lock().unwrap().get_mut(id) {
            merge_tags(&mut vm.tags, tags);
            true
        } else if let Some(subnet) = client.subnets.lock().unwrap().get_mut(id) {
            merge_tags(&mut subnet.tags, tags);
            true
        } else if let Some(sg) = client.security_groups.lock().unwrap().get_mut(id) {
            merge_tags(&mut sg.tags, tags);
            true
        } else if let Some(ip) = client.public_ips.lock().unwrap().get_mut(id) {
            merge_tags(&mut ip.tags, tags);
            true
        } else {
            false
        };

        if !found {
            return Err(OscError::NotFound(format!("Resource {} not found", id)));
        }
    }
    client.record("CreateTags", &resource_ids.join(","));
    Ok(())
}
