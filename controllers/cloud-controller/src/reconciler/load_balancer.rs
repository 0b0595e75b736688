//! LoadBalancer Service reconciliation
//!
//! One pass runs in two phases:
//!
//! 1. Resolution: existing load balancers, subnets, placement, public IPs,
//!    backend VMs and security groups are read. Nothing is changed and any
//!    error aborts the pass.
//! 2. Mutation: ingress group, node linkage, then each load balancer instance
//!    (create, or converge listeners, security groups and backends). A failure
//!    here is reported as `ReconcileFailed` with the changes already applied.
//!
//! Load balancers created for a Service carry `OscK8sService=<namespace>/<name>`
//! and `OscK8sInstanceCount`, which is how later passes find them again.

use super::placement::{self, LbuPlan};
use super::scope::{Ownership, INSTANCE_COUNT_TAG, SERVICE_TAG};
use super::{Lookup, MutationLog, Reconciler};
use crate::error::ControllerError;
use crate::intent::{PortSpec, ServiceIntent};
use k8s_openapi::api::core::v1::{LoadBalancerIngress, Node};
use osc_client::{tag_value, CreateLoadBalancerRequest, Listener, LoadBalancer, ResourceFilter, ResourceTag, SecurityGroup};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Nodes carrying this label are not registered as backends
pub const EXCLUDE_FROM_LB_LABEL: &str = "node.kubernetes.io/exclude-from-external-load-balancers";

const LISTENER_PROTOCOL: &str = "TCP";
const TYPE_INTERNAL: &str = "internal";
const TYPE_INTERNET_FACING: &str = "internet-facing";

/// Result of a successful pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadBalancerStatus {
    /// One entry per load balancer instance, in plan order
    pub ingress: Vec<LoadBalancerIngress>,
    /// Changes applied during the pass
    pub applied: Vec<String>,
}

/// Everything the mutation phase needs, gathered without side effects
#[derive(Debug)]
struct Resolution {
    existing: Vec<LoadBalancer>,
    plans: Vec<LbuPlan>,
    public_ips: BTreeMap<usize, String>,
    backend_vm_ids: Vec<String>,
    node_groups: Vec<SecurityGroup>,
    ingress_group: Option<SecurityGroup>,
}

/// Listeners forwarding each Service port to its node port
pub fn desired_listeners(ports: &[PortSpec]) -> Vec<Listener> {
    ports
        .iter()
        .map(|port| Listener {
            backend_port: port.node_port,
            backend_protocol: LISTENER_PROTOCOL.to_string(),
            load_balancer_port: port.port,
            load_balancer_protocol: LISTENER_PROTOCOL.to_string(),
        })
        .collect()
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    a.load_balancer_port == b.load_balancer_port
        && a.backend_port == b.backend_port
        && a.load_balancer_protocol.eq_ignore_ascii_case(&b.load_balancer_protocol)
        && a.backend_protocol.eq_ignore_ascii_case(&b.backend_protocol)
}

/// Instance count recorded on existing load balancers, else their number
pub fn prior_instance_count(existing: &[LoadBalancer]) -> usize {
    existing
        .iter()
        .filter_map(|lb| tag_value(&lb.tags, INSTANCE_COUNT_TAG))
        .filter_map(|v| v.parse::<usize>().ok())
        .max()
        .unwrap_or(existing.len())
}

fn excluded(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| labels.contains_key(EXCLUDE_FROM_LB_LABEL))
}

fn ingress_of(lb: &LoadBalancer) -> LoadBalancerIngress {
    LoadBalancerIngress {
        hostname: (!lb.dns_name.is_empty()).then(|| lb.dns_name.clone()),
        ip: lb.public_ip.clone().filter(|ip| !ip.is_empty()),
        ..Default::default()
    }
}

fn sorted_set(items: &[String]) -> BTreeSet<&str> {
    items.iter().map(String::as_str).collect()
}

impl Reconciler {
    /// Load balancers created for a Service, sorted by name
    pub async fn service_load_balancers(&self, service_key: &str) -> Result<Vec<LoadBalancer>, ControllerError> {
        let filter = self.scope.filter().tag(SERVICE_TAG, service_key);
        let mut lbs: Vec<LoadBalancer> = self
            .query("read load balancers", || self.osc.read_load_balancers(&filter))
            .await?
            .into_iter()
            .filter(|lb| self.scope.in_scope(&lb.tags))
            .collect();
        lbs.sort_by(|a, b| a.load_balancer_name.cmp(&b.load_balancer_name));
        Ok(lbs)
    }

    async fn resolve(&self, intent: &ServiceIntent, nodes: &[Node]) -> Result<Resolution, ControllerError> {
        let existing = self.service_load_balancers(&intent.service_key).await?;
        let inventory = self.load_subnet_inventory().await?;
        let plans = placement::plan(intent, &inventory, self.region(), prior_instance_count(&existing))?;

        for lbu in plans.iter().filter(|p| !existing.iter().any(|lb| lb.load_balancer_name == p.name)) {
            let filter = ResourceFilter::new().name(lbu.name.clone());
            let taken = self
                .query("read load balancer by name", || self.osc.read_load_balancers(&filter))
                .await?;
            if let Some(other) = taken.first() {
                return Err(ControllerError::InvalidService(format!(
                    "load balancer name {} is already used{}",
                    lbu.name,
                    tag_value(&other.tags, SERVICE_TAG)
                        .map(|s| format!(" by Service {}", s))
                        .unwrap_or_default()
                )));
            }
        }

        let mut public_ips = BTreeMap::new();
        for lbu in &plans {
            let Some(ip_id) = &lbu.public_ip_id else { continue };
            if intent.internal {
                warn!("Ignoring public IP {} of internal Service {}", ip_id, intent.service_key);
                continue;
            }
            let filter = ResourceFilter::new().id(ip_id.clone());
            let ip = self
                .query("read public IPs", || self.osc.read_public_ips(&filter))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ControllerError::PublicIpNotFound(ip_id.clone()))?;
            public_ips.insert(lbu.index, ip.public_ip);
        }

        let mut backend_vm_ids = BTreeSet::new();
        for node in nodes.iter().filter(|n| !excluded(n)) {
            backend_vm_ids.insert(self.resolve_vm(node).await?.vm_id);
        }

        let node_groups = match self.resolve_node_security_group(&intent.target_role).await? {
            Lookup::Found(sg) => vec![sg],
            Lookup::AmbiguousMultiple(groups) => groups,
            Lookup::NotFound => {
                warn!(
                    "No security group for role {} nor main security group; Service {} gets no node linkage rules",
                    intent.target_role, intent.service_key
                );
                vec![]
            }
        };

        let ingress_group = self.find_ingress_group(intent).await?;

        Ok(Resolution {
            existing,
            plans,
            public_ips,
            backend_vm_ids: backend_vm_ids.into_iter().collect(),
            node_groups,
            ingress_group,
        })
    }

    /// Converge the load balancers of a Service onto its intent.
    ///
    /// `nodes` are the cluster nodes; all of them except those labeled
    /// `node.kubernetes.io/exclude-from-external-load-balancers` become backends.
    pub async fn ensure_load_balancer(
        &self,
        intent: &ServiceIntent,
        nodes: &[Node],
    ) -> Result<LoadBalancerStatus, ControllerError> {
        info!("Reconciling load balancer of Service {}", intent.service_key);
        let resolution = self.resolve(intent, nodes).await?;
        let mut log = MutationLog::default();

        let ingress = self
            .reconcile_ingress_sg(intent, &resolution.plans, resolution.ingress_group.clone(), &mut log)
            .await?;
        self.reconcile_node_linkage(&ingress, &resolution.node_groups, &intent.ports, &mut log)
            .await?;

        let mut security_groups = vec![ingress.security_group_id.clone()];
        for extra in &intent.extra_sg_ids {
            if !security_groups.contains(extra) {
                security_groups.push(extra.clone());
            }
        }
        let listeners = desired_listeners(&intent.ports);

        let mut status = LoadBalancerStatus::default();
        for lbu in &resolution.plans {
            let current = resolution
                .existing
                .iter()
                .find(|lb| lb.load_balancer_name == lbu.name);
            let lb = match current {
                Some(lb) => {
                    self.sync_load_balancer(lb, &listeners, &security_groups, &resolution.backend_vm_ids, &mut log)
                        .await?;
                    if lb.subnets.iter().all(|s| s != &lbu.subnet_id) {
                        warn!(
                            "Load balancer {} stays in subnet(s) {:?}; planned subnet {} is not applied to existing load balancers",
                            lb.load_balancer_name, lb.subnets, lbu.subnet_id
                        );
                    }
                    lb.clone()
                }
                None => {
                    let request = CreateLoadBalancerRequest {
                        load_balancer_name: lbu.name.clone(),
                        load_balancer_type: (if intent.internal { TYPE_INTERNAL } else { TYPE_INTERNET_FACING }).to_string(),
                        listeners: listeners.clone(),
                        subnets: vec![lbu.subnet_id.clone()],
                        security_groups: security_groups.clone(),
                        public_ip: resolution.public_ips.get(&lbu.index).cloned(),
                        tags: self.load_balancer_tags(intent),
                    };
                    self.create_load_balancer(&request, &resolution.backend_vm_ids, &mut log)
                        .await?
                }
            };
            status.ingress.push(ingress_of(&lb));
        }

        let planned: BTreeSet<&str> = resolution.plans.iter().map(|p| p.name.as_str()).collect();
        for stale in resolution
            .existing
            .iter()
            .filter(|lb| !planned.contains(lb.load_balancer_name.as_str()))
        {
            self.delete_load_balancer(stale, &mut log).await?;
        }

        info!(
            "Load balancer of Service {} is in sync ({} change(s))",
            intent.service_key,
            log.applied.len()
        );
        status.applied = log.applied;
        Ok(status)
    }

    /// Delete the load balancers and managed ingress group of a Service.
    ///
    /// Returns the changes applied.
    pub async fn ensure_load_balancer_deleted(&self, service_key: &str) -> Result<Vec<String>, ControllerError> {
        info!("Deleting load balancer of Service {}", service_key);
        let existing = self.service_load_balancers(service_key).await?;
        let mut log = MutationLog::default();
        for lb in &existing {
            self.delete_load_balancer(lb, &mut log).await?;
        }
        self.cleanup_ingress_sg(service_key, &mut log).await?;
        Ok(log.applied)
    }

    fn load_balancer_tags(&self, intent: &ServiceIntent) -> Vec<ResourceTag> {
        let mut tags = self.scope.owned_tags(&intent.service_key);
        tags.push(ResourceTag::new(INSTANCE_COUNT_TAG, intent.instance_count.to_string()));
        tags
    }

    async fn create_load_balancer(
        &self,
        request: &CreateLoadBalancerRequest,
        backend_vm_ids: &[String],
        log: &mut MutationLog,
    ) -> Result<LoadBalancer, ControllerError> {
        let name = request.load_balancer_name.clone();
        let mut lb = self
            .mutate(
                log,
                format!("create load balancer {} in {}", name, request.subnets.join(",")),
                || self.osc.create_load_balancer(request),
            )
            .await?;
        info!("Created load balancer {} ({})", name, lb.dns_name);

        if !backend_vm_ids.is_empty() {
            self.mutate(log, format!("register {} VM(s) in {}", backend_vm_ids.len(), name), || {
                self.osc.register_vms_in_load_balancer(&name, backend_vm_ids)
            })
            .await?;
            lb.backend_vm_ids = backend_vm_ids.to_vec();
        }
        Ok(lb)
    }

    /// Converge listeners, security groups and backends of an existing load balancer
    async fn sync_load_balancer(
        &self,
        lb: &LoadBalancer,
        listeners: &[Listener],
        security_groups: &[String],
        backend_vm_ids: &[String],
        log: &mut MutationLog,
    ) -> Result<(), ControllerError> {
        let name = lb.load_balancer_name.clone();

        let stale_ports: Vec<i32> = lb
            .listeners
            .iter()
            .filter(|l| !listeners.iter().any(|d| same_listener(d, l)))
            .map(|l| l.load_balancer_port)
            .collect();
        if !stale_ports.is_empty() {
            self.mutate(log, format!("delete listener(s) {:?} of {}", stale_ports, name), || {
                self.osc.delete_load_balancer_listeners(&name, &stale_ports)
            })
            .await?;
        }
        let missing: Vec<Listener> = listeners
            .iter()
            .filter(|d| !lb.listeners.iter().any(|l| same_listener(d, l)))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let ports: Vec<i32> = missing.iter().map(|l| l.load_balancer_port).collect();
            self.mutate(log, format!("create listener(s) {:?} on {}", ports, name), || {
                self.osc.create_load_balancer_listeners(&name, &missing)
            })
            .await?;
        }

        if sorted_set(&lb.security_groups) != sorted_set(security_groups) {
            self.mutate(log, format!("set security groups of {} to {}", name, security_groups.join(",")), || {
                self.osc.update_load_balancer_security_groups(&name, security_groups)
            })
            .await?;
        }

        let register: Vec<String> = backend_vm_ids
            .iter()
            .filter(|id| !lb.backend_vm_ids.contains(id))
            .cloned()
            .collect();
        if !register.is_empty() {
            self.mutate(log, format!("register VM(s) {} in {}", register.join(","), name), || {
                self.osc.register_vms_in_load_balancer(&name, &register)
            })
            .await?;
        }
        let deregister: Vec<String> = lb
            .backend_vm_ids
            .iter()
            .filter(|id| !backend_vm_ids.contains(id))
            .cloned()
            .collect();
        if !deregister.is_empty() {
            self.mutate(log, format!("deregister VM(s) {} from {}", deregister.join(","), name), || {
                self.osc.deregister_vms_in_load_balancer(&name, &deregister)
            })
            .await?;
        }

        debug!("Load balancer {} synced", name);
        Ok(())
    }

    async fn delete_load_balancer(&self, lb: &LoadBalancer, log: &mut MutationLog) -> Result<(), ControllerError> {
        if self.scope.ownership(&lb.tags) != Some(Ownership::Owned) {
            debug!("Load balancer {} is not owned by the cluster, keeping it", lb.load_balancer_name);
            return Ok(());
        }
        let name = lb.load_balancer_name.clone();
        self.mutate(log, format!("delete load balancer {}", name), || {
            self.osc.delete_load_balancer(&name)
        })
        .await?;
        info!("Deleted load balancer {}", name);
        Ok(())
    }
}
