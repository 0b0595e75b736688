//! Load balancer instance placement
//!
//! A Service gets 1 to 3 load balancer instances (LBUs), each in its own
//! subregion. The plan is recomputed on every reconciliation and is a pure
//! function of the Service intent and the subnet inventory.

use super::subnet::SubnetInventory;
use super::Lookup;
use crate::annotations;
use crate::error::ControllerError;
use crate::intent::ServiceIntent;
use osc_client::Subnet;
use tracing::{info, warn};

const LBU_NAME_MAX_LEN: usize = 32;
const SUBREGION_SUFFIXES: [char; 3] = ['a', 'b', 'c'];

/// Placement of one load balancer instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbuPlan {
    /// Position of the instance, 0-based
    pub index: usize,
    pub name: String,
    pub requested_subregion: String,
    /// Subregion of the chosen subnet
    pub subregion: String,
    pub subnet_id: String,
    /// Net of the chosen subnet
    pub net_id: String,
    pub public_ip_id: Option<String>,
    /// Subnet taken from another subregion because the requested one had none
    pub fallback: bool,
}

/// First `count` subregions of a region: `<region>a`, `<region>b`, ...
pub fn default_subregions(region: &str, count: usize) -> Vec<String> {
    SUBREGION_SUFFIXES
        .iter()
        .take(count)
        .map(|suffix| format!("{}{}", region, suffix))
        .collect()
}

/// Name of instance `index` out of `count`.
///
/// A single instance keeps the base name; otherwise `-<index>` is appended
/// and the base shortened so the result fits the 32 character limit.
pub fn instance_name(base: &str, index: usize, count: usize) -> String {
    if count <= 1 {
        return base.to_string();
    }
    let suffix = format!("-{}", index);
    let keep = LBU_NAME_MAX_LEN.saturating_sub(suffix.len()).min(base.len());
    format!("{}{}", &base[..keep], suffix)
}

fn check_len(field: &str, values: Option<&Vec<String>>, expected: usize) -> Result<(), ControllerError> {
    match values {
        Some(values) if values.len() != expected => Err(ControllerError::InstanceOverrideMismatch {
            field: field.to_string(),
            expected,
            actual: values.len(),
        }),
        _ => Ok(()),
    }
}

/// Each instance needs its own name and public IP
fn check_distinct(field: &str, values: Option<&Vec<String>>) -> Result<(), ControllerError> {
    let Some(values) = values else {
        return Ok(());
    };
    for (i, value) in values.iter().enumerate() {
        if values[..i].contains(value) {
            return Err(ControllerError::InvalidAnnotation {
                key: field.to_string(),
                value: values.join(","),
                reason: format!("{} is listed more than once", value),
            });
        }
    }
    Ok(())
}

/// Subnet in another subregion with free addresses.
///
/// Subregions not used yet by the plan come first, then subregion name, then subnet id.
fn fallback_subnet(
    inventory: &SubnetInventory,
    internal: bool,
    requested: &str,
    used: &[String],
) -> Option<Subnet> {
    inventory
        .subregions()
        .into_iter()
        .filter(|sr| sr != requested)
        .flat_map(|sr| match inventory.resolve_in_subregion(internal, &sr) {
            Lookup::Found(subnet) => vec![subnet],
            Lookup::AmbiguousMultiple(subnets) => subnets,
            Lookup::NotFound => vec![],
        })
        .filter(|s| s.available_ips_count > 0)
        .min_by(|a, b| {
            let a_used = used.contains(&a.subregion_name);
            let b_used = used.contains(&b.subregion_name);
            (a_used, &a.subregion_name, &a.subnet_id).cmp(&(b_used, &b.subregion_name, &b.subnet_id))
        })
}

/// Plan the load balancer instances of a Service.
///
/// `prior_count` is the number of instances already created for the Service
/// (0 when none); a different requested count is rejected before anything is
/// resolved.
pub fn plan(
    intent: &ServiceIntent,
    inventory: &SubnetInventory,
    region: &str,
    prior_count: usize,
) -> Result<Vec<LbuPlan>, ControllerError> {
    let count = intent.instance_count;
    if !(1..=annotations::MAX_INSTANCES).contains(&count) {
        return Err(ControllerError::InvalidAnnotation {
            key: annotations::INSTANCES.to_string(),
            value: count.to_string(),
            reason: format!("expected an integer between 1 and {}", annotations::MAX_INSTANCES),
        });
    }
    if prior_count > 0 && prior_count != count {
        return Err(ControllerError::ImmutableInstanceCount {
            service: intent.service_key.clone(),
            existing: prior_count,
            requested: count,
        });
    }

    check_len(annotations::SUBREGIONS, intent.subregions_requested.as_ref(), count)?;
    check_len(annotations::NAME, intent.names.as_ref(), count)?;
    check_len(annotations::SUBNET_ID, intent.subnet_ids.as_ref(), count)?;
    check_len(annotations::IP_ID, intent.ip_ids.as_ref(), count)?;
    check_distinct(annotations::NAME, intent.names.as_ref())?;
    check_distinct(annotations::IP_ID, intent.ip_ids.as_ref())?;

    let subregions = intent
        .subregions_requested
        .clone()
        .unwrap_or_else(|| default_subregions(region, count));

    let mut plans: Vec<LbuPlan> = Vec::with_capacity(count);
    for (index, requested) in subregions.into_iter().enumerate() {
        let (subnet, fallback) = match intent.subnet_ids.as_ref().map(|ids| &ids[index]) {
            Some(subnet_id) => {
                let subnet = inventory.get(subnet_id).cloned().ok_or_else(|| {
                    ControllerError::SubnetNotFound(format!(
                        "subnet {} requested for Service {} does not exist",
                        subnet_id, intent.service_key
                    ))
                })?;
                (subnet, false)
            }
            None => match inventory.resolve_subnet(intent, &requested).first() {
                Some(subnet) => (subnet, false),
                None => {
                    let used: Vec<String> = plans.iter().map(|p| p.subregion.clone()).collect();
                    let subnet = fallback_subnet(inventory, intent.internal, &requested, &used)
                        .ok_or_else(|| {
                            ControllerError::SubnetNotFound(format!(
                                "no subnet for Service {} in {} nor in any other subregion",
                                intent.service_key, requested
                            ))
                        })?;
                    warn!(
                        "No subnet in {} for Service {}; placing instance {} in {} ({})",
                        requested, intent.service_key, index, subnet.subregion_name, subnet.subnet_id
                    );
                    (subnet, true)
                }
            },
        };

        let name = match &intent.names {
            Some(names) => names[index].clone(),
            None => instance_name(&intent.load_balancer_name, index, count),
        };

        plans.push(LbuPlan {
            index,
            name,
            requested_subregion: requested,
            subregion: subnet.subregion_name.clone(),
            subnet_id: subnet.subnet_id,
            net_id: subnet.net_id,
            public_ip_id: intent.ip_ids.as_ref().map(|ids| ids[index].clone()),
            fallback,
        });
    }

    info!(
        "Planned {} load balancer instance(s) for Service {}: {}",
        plans.len(),
        intent.service_key,
        plans
            .iter()
            .map(|p| format!("{}@{}", p.name, p.subregion))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(plans)
}
