//! Security group reconciliation
//!
//! Each Service has one ingress security group shared by all of its load
//! balancer instances: either the group named by the
//! `osc-load-balancer-security-group` annotation or a group created for the
//! Service. Its inbound rules converge on `ports x source ranges` by applying
//! only the delta. Node security groups receive one inbound rule per node port
//! sourced from the ingress group; stale ones are only removed when the
//! ingress group is owned by the cluster.

use super::placement::LbuPlan;
use super::rules::{self, RulePermission, RuleSource};
use super::scope::{Ownership, SERVICE_TAG};
use super::{Lookup, MutationLog, Reconciler};
use crate::error::ControllerError;
use crate::intent::{PortSpec, ServiceIntent};
use osc_client::{Flow, ResourceFilter, SecurityGroup};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

const INGRESS_GROUP_PREFIX: &str = "k8s-elb-";

/// Ingress security group of a Service
#[derive(Debug, Clone, PartialEq)]
pub struct IngressGroup {
    pub security_group_id: String,
    pub ownership: Ownership,
}

/// Name of the security group created for a load balancer base name
pub fn ingress_group_name(load_balancer_name: &str) -> String {
    format!("{}{}", INGRESS_GROUP_PREFIX, load_balancer_name)
}

/// One rule per exposed port and source range
pub fn desired_ingress_permissions(intent: &ServiceIntent) -> BTreeSet<RulePermission> {
    intent
        .ports
        .iter()
        .flat_map(|port| {
            intent
                .source_ranges
                .iter()
                .map(move |cidr| RulePermission::tcp_port(port.port, RuleSource::Cidr(cidr.clone())))
        })
        .collect()
}

/// One rule per node port, sourced from the ingress group
pub fn desired_linkage_permissions(ingress_sg_id: &str, ports: &[PortSpec]) -> BTreeSet<RulePermission> {
    ports
        .iter()
        .map(|port| {
            RulePermission::tcp_port(
                port.node_port,
                RuleSource::SecurityGroup(ingress_sg_id.to_string()),
            )
        })
        .collect()
}

fn describe_all(permissions: &[RulePermission]) -> String {
    permissions
        .iter()
        .map(RulePermission::describe)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Reconciler {
    /// Find the ingress group of a Service without changing anything.
    ///
    /// An annotated group must exist and be in scope, else `SGNotFound`.
    /// A managed group is found by its `OscK8sService` tag; `None` means it
    /// still has to be created.
    pub async fn find_ingress_group(&self, intent: &ServiceIntent) -> Result<Option<SecurityGroup>, ControllerError> {
        if let Some(id) = &intent.existing_sg_id {
            let filter = ResourceFilter::new().id(id.clone());
            let sg = self
                .query("read security group", || self.osc.read_security_groups(&filter))
                .await?
                .into_iter()
                .find(|sg| self.scope.in_scope(&sg.tags))
                .ok_or_else(|| {
                    ControllerError::SGNotFound(format!(
                        "{} (annotation of Service {}) does not exist or is not tagged for cluster {}",
                        id, intent.service_key, self.scope.cluster_id
                    ))
                })?;
            return Ok(Some(sg));
        }

        self.find_managed_group(&intent.service_key).await
    }

    /// Group created by this controller for a Service
    async fn find_managed_group(&self, service_key: &str) -> Result<Option<SecurityGroup>, ControllerError> {
        let filter = self.scope.filter().tag(SERVICE_TAG, service_key);
        let mut groups: Vec<SecurityGroup> = self
            .query("read ingress security groups", || self.osc.read_security_groups(&filter))
            .await?
            .into_iter()
            .filter(|sg| self.scope.ownership(&sg.tags) == Some(Ownership::Owned))
            .collect();
        groups.sort_by(|a, b| a.security_group_id.cmp(&b.security_group_id));

        match Lookup::from_sorted(groups) {
            Lookup::Found(sg) => Ok(Some(sg)),
            Lookup::AmbiguousMultiple(mut groups) => {
                warn!(
                    "{} security groups tagged {}={}; using {}",
                    groups.len(),
                    SERVICE_TAG,
                    service_key,
                    groups[0].security_group_id
                );
                Ok(Some(groups.remove(0)))
            }
            Lookup::NotFound => Ok(None),
        }
    }

    /// Converge the ingress group of a Service.
    ///
    /// `existing` is the result of [`Reconciler::find_ingress_group`]. A
    /// missing group is created in the net of the first load balancer
    /// instance and tagged `owned`. Shared groups only get rules added.
    pub async fn reconcile_ingress_sg(
        &self,
        intent: &ServiceIntent,
        lbus: &[LbuPlan],
        existing: Option<SecurityGroup>,
        log: &mut MutationLog,
    ) -> Result<IngressGroup, ControllerError> {
        let sg = match existing {
            Some(sg) => sg,
            None => self.create_ingress_group(intent, lbus, log).await?,
        };
        let id = sg.security_group_id.clone();
        let ownership = self.scope.ownership(&sg.tags).ok_or_else(|| {
            ControllerError::SGNotFound(format!("{} is not tagged for cluster {}", id, self.scope.cluster_id))
        })?;

        let desired = desired_ingress_permissions(intent);
        let current = rules::permissions(&sg.inbound_rules);
        let delta = rules::diff(&desired, &current);

        if !delta.to_add.is_empty() {
            let add = rules::to_api_rules(&delta.to_add);
            self.mutate(
                log,
                format!("add inbound rule(s) to {}: {}", id, describe_all(&delta.to_add)),
                || self.osc.create_security_group_rules(&id, Flow::Inbound, &add),
            )
            .await?;
        }

        if !delta.to_remove.is_empty() {
            if ownership == Ownership::Shared {
                debug!(
                    "Keeping {} extra rule(s) on shared security group {}",
                    delta.to_remove.len(),
                    id
                );
            } else {
                let remove = rules::to_api_rules(&delta.to_remove);
                self.mutate(
                    log,
                    format!("remove inbound rule(s) from {}: {}", id, describe_all(&delta.to_remove)),
                    || self.osc.delete_security_group_rules(&id, Flow::Inbound, &remove),
                )
                .await?;
            }
        }

        Ok(IngressGroup {
            security_group_id: id,
            ownership,
        })
    }

    async fn create_ingress_group(
        &self,
        intent: &ServiceIntent,
        lbus: &[LbuPlan],
        log: &mut MutationLog,
    ) -> Result<SecurityGroup, ControllerError> {
        let net_id = lbus
            .first()
            .map(|lbu| lbu.net_id.clone())
            .or_else(|| self.scope.net_id.clone());
        let name = ingress_group_name(&intent.load_balancer_name);
        let description = format!("Load balancer ingress of Service {}", intent.service_key);

        let mut sg = self
            .mutate(log, format!("create security group {}", name), || {
                self.osc.create_security_group(&name, &description, net_id.as_deref())
            })
            .await?;

        let ids = vec![sg.security_group_id.clone()];
        let tags = self.scope.owned_tags(&intent.service_key);
        self.mutate(log, format!("tag security group {}", sg.security_group_id), || {
            self.osc.create_tags(&ids, &tags)
        })
        .await?;
        for tag in tags {
            sg.tags.retain(|t| t.key != tag.key);
            sg.tags.push(tag);
        }

        info!(
            "Created security group {} ({}) for Service {}",
            sg.security_group_id, name, intent.service_key
        );
        Ok(sg)
    }

    /// Allow traffic from the ingress group to the node ports on every node group.
    ///
    /// Missing rules are added. Rules sourced from an `owned` ingress group
    /// that no longer match a node port are removed; every other rule of a
    /// node group is left alone.
    pub async fn reconcile_node_linkage(
        &self,
        ingress: &IngressGroup,
        node_groups: &[SecurityGroup],
        ports: &[PortSpec],
        log: &mut MutationLog,
    ) -> Result<(), ControllerError> {
        let desired = desired_linkage_permissions(&ingress.security_group_id, ports);
        let source = RuleSource::SecurityGroup(ingress.security_group_id.clone());
        for node_sg in node_groups {
            if node_sg.security_group_id == ingress.security_group_id {
                continue;
            }
            let id = node_sg.security_group_id.clone();
            let current = rules::permissions(&node_sg.inbound_rules);

            let missing: Vec<RulePermission> = desired.difference(&current).cloned().collect();
            if !missing.is_empty() {
                let add = rules::to_api_rules(&missing);
                self.mutate(
                    log,
                    format!("add linkage rule(s) to {}: {}", id, describe_all(&missing)),
                    || self.osc.create_security_group_rules(&id, Flow::Inbound, &add),
                )
                .await?;
            }

            if ingress.ownership != Ownership::Owned {
                continue;
            }
            let stale: Vec<RulePermission> = current
                .difference(&desired)
                .filter(|p| p.source == source)
                .cloned()
                .collect();
            if !stale.is_empty() {
                let remove = rules::to_api_rules(&stale);
                self.mutate(
                    log,
                    format!("remove linkage rule(s) from {}: {}", id, describe_all(&stale)),
                    || self.osc.delete_security_group_rules(&id, Flow::Inbound, &remove),
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Remove the managed ingress group of a deleted Service.
    ///
    /// Rules sourced from the group are removed from the other in-scope
    /// groups first. Groups that are not `owned` by the cluster or were not
    /// created for this Service are left untouched.
    pub async fn cleanup_ingress_sg(&self, service_key: &str, log: &mut MutationLog) -> Result<(), ControllerError> {
        let Some(sg) = self.find_managed_group(service_key).await? else {
            debug!("No managed security group left for Service {}", service_key);
            return Ok(());
        };
        let id = sg.security_group_id.clone();
        let source = RuleSource::SecurityGroup(id.clone());

        let scope_filter = self.scope.filter();
        let groups = self
            .query("read cluster security groups", || self.osc.read_security_groups(&scope_filter))
            .await?;
        for other in groups.iter().filter(|g| g.security_group_id != id) {
            let referencing: Vec<RulePermission> = rules::permissions(&other.inbound_rules)
                .into_iter()
                .filter(|p| p.source == source)
                .collect();
            if referencing.is_empty() {
                continue;
            }
            let other_id = other.security_group_id.clone();
            let remove = rules::to_api_rules(&referencing);
            self.mutate(
                log,
                format!("remove linkage rule(s) from {}: {}", other_id, describe_all(&referencing)),
                || self.osc.delete_security_group_rules(&other_id, Flow::Inbound, &remove),
            )
            .await?;
        }

        self.mutate(log, format!("delete security group {}", id), || {
            self.osc.delete_security_group(&id)
        })
        .await?;
        info!("Deleted security group {} of Service {}", id, service_key);
        Ok(())
    }
}
