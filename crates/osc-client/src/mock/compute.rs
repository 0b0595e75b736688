//! Compute operations for MockOscClient
//!
//! Handles VMs and subregions

use super::MockOscClient;
use crate::common::filters::ResourceFilter;
use crate::error::OscError;
use crate::models::*;

pub async fn read_vms(client: &MockOscClient, filter: &ResourceFilter) -> Result<Vec<Vm>, OscError> {
    client.check_failure("ReadVms")?;
    let mut vms: Vec<Vm> = client
        .vms
        .lock()
        .unwrap()
        .values()
        .filter(|vm| filter.matches(*vm))
        .cloned()
        .collect();
    vms.sort_by(|a, b| a.vm_id.cmp(&b.vm_id));
    Ok(vms)
}

pub async fn read_subregions(client: &MockOscClient) -> Result<Vec<Subregion>, OscError> {
    client.check_failure("ReadSubregions")?;
    Ok(client.subregions.lock().unwrap().clone())
}
