//! Load balancer operations for MockOscClient
//!
//! Handles LBUs, their listeners, security groups and backend VMs

use super::MockOscClient;
use crate::common::filters::ResourceFilter;
use crate::error::OscError;
use crate::models::*;

const MAX_NAME_LEN: usize = 32;

fn not_found(name: &str) -> OscError {
    OscError::NotFound(format!("Load balancer {} not found", name))
}

pub async fn read_load_balancers(client: &MockOscClient, filter: &ResourceFilter) -> Result<Vec<LoadBalancer>, OscError> {
    client.check_failure("ReadLoadBalancers")?;
    let mut lbs: Vec<LoadBalancer> = client
        .load_balancers
        .lock()
        .unwrap()
        .values()
        .filter(|lb| filter.matches(*lb))
        .cloned()
        .collect();
    lbs.sort_by(|a, b| a.load_balancer_name.cmp(&b.load_balancer_name));
    Ok(lbs)
}

pub async fn create_load_balancer(client: &MockOscClient, request: &CreateLoadBalancerRequest) -> Result<LoadBalancer, OscError> {
    client.check_failure("CreateLoadBalancer")?;

    if request.load_balancer_name.is_empty() || request.load_balancer_name.len() > MAX_NAME_LEN {
        return Err(OscError::InvalidRequest(format!(
            "InvalidParameterValue: load balancer name {} must be 1-{} characters",
            request.load_balancer_name, MAX_NAME_LEN
        )));
    }
    if let Some(existing) = client.load_balancer(&request.load_balancer_name) {
        return Ok(existing);
    }

    let (net_id, subregion_names) = {
        let subnets = client.subnets.lock().unwrap();
        let mut net_id = None;
        let mut subregions = Vec::new();
        for id in &request.subnets {
            let subnet = subnets
                .get(id)
                .ok_or_else(|| OscError::NotFound(format!("Subnet {} not found", id)))?;
            net_id = Some(subnet.net_id.clone());
            subregions.push(subnet.subregion_name.clone());
        }
        (net_id, subregions)
    };

    let public_ip = match &request.public_ip {
        Some(ip) => Some(ip.clone()),
        None if request.load_balancer_type == "internet-facing" => {
            Some(format!("198.51.100.{}", client.next_id() % 250 + 1))
        }
        None => None,
    };

    let lb = LoadBalancer {
        load_balancer_name: request.load_balancer_name.clone(),
        load_balancer_type: request.load_balancer_type.clone(),
        dns_name: format!(
            "{}-{}.{}.lbu.outscale.com",
            request.load_balancer_name,
            client.next_id(),
            client.region
        ),
        net_id,
        subnets: request.subnets.clone(),
        subregion_names,
        security_groups: request.security_groups.clone(),
        listeners: request.listeners.clone(),
        backend_vm_ids: Vec::new(),
        public_ip,
        tags: request.tags.clone(),
    };
    client
        .load_balancers
        .lock()
        .unwrap()
        .insert(lb.load_balancer_name.clone(), lb.clone());
    client.record("CreateLoadBalancer", &lb.load_balancer_name);
    Ok(lb)
}

pub async fn delete_load_balancer(client: &MockOscClient, name: &str) -> Result<(), OscError> {
    client.check_failure("DeleteLoadBalancer")?;
    client.load_balancers.lock().unwrap().remove(name);
    client.record("DeleteLoadBalancer", name);
    Ok(())
}

pub async fn update_load_balancer_security_groups(client: &MockOscClient, name: &str, security_group_ids: &[String]) -> Result<(), OscError> {
    client.check_failure("UpdateLoadBalancer")?;
    {
        let mut lbs = client.load_balancers.lock().unwrap();
        let lb = lbs.get_mut(name).ok_or_else(|| not_found(name))?;
        lb.security_groups = security_group_ids.to_vec();
    }
    client.record("UpdateLoadBalancer", name);
    Ok(())
}

pub async fn create_load_balancer_listeners(client: &MockOscClient, name: &str, listeners: &[Listener]) -> Result<(), OscError> {
    client.check_failure("CreateLoadBalancerListeners")?;
    {
        let mut lbs = client.load_balancers.lock().unwrap();
        let lb = lbs.get_mut(name).ok_or_else(|| not_found(name))?;
        for listener in listeners {
            if !lb
                .listeners
                .iter()
                .any(|l| l.load_balancer_port == listener.load_balancer_port)
            {
                lb.listeners.push(listener.clone());
            }
        }
    }
    client.record("CreateLoadBalancerListeners", name);
    Ok(())
}

pub async fn delete_load_balancer_listeners(client: &MockOscClient, name: &str, load_balancer_ports: &[i32]) -> Result<(), OscError> {
    client.check_failure("DeleteLoadBalancerListeners")?;
    if let Some(lb) = client.load_balancers.lock().unwrap().get_mut(name) {
        lb.listeners
            .retain(|l| !load_balancer_ports.contains(&l.load_balancer_port));
    }
    client.record("DeleteLoadBalancerListeners", name);
    Ok(())
}

pub async fn register_vms_in_load_balancer(client: &MockOscClient, name: &str, vm_ids: &[String]) -> Result<(), OscError> {
    client.check_failure("RegisterVmsInLoadBalancer")?;
    {
        let mut lbs = client.load_balancers.lock().unwrap();
        let lb = lbs.get_mut(name).ok_or_else(|| not_found(name))?;
        for vm_id in vm_ids {
            if !lb.backend_vm_ids.contains(vm_id) {
                lb.backend_vm_ids.push(vm_id.clone());
            }
        }
    }
    client.record("RegisterVmsInLoadBalancer", name);
    Ok(())
}

pub async fn deregister_vms_in_load_balancer(client: &MockOscClient, name: &str, vm_ids: &[String]) -> Result<(), OscError> {
    client.check_failure("DeregisterVmsInLoadBalancer")?;
    if let Some(lb) = client.load_balancers.lock().unwrap().get_mut(name) {
        lb.backend_vm_ids.retain(|id| !vm_ids.contains(id));
    }
    client.record("DeregisterVmsInLoadBalancer", name);
    Ok(())
}
