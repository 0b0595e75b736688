//! Node to VM mapping
//!
//! A Node maps to its VM through `spec.providerID` (`osc:///<subregion>/<vm id>`,
//! or the legacy `aws:///` form) and, failing that, through VMs tagged
//! `OscK8sNodeName=<node name>`. Node security groups are found by role tag,
//! with the cluster main security group as fallback.

use super::scope::{role_tag, ClusterScope, NODE_NAME_TAG};
use super::{Lookup, Reconciler};
use crate::backoff::{retry_transient, RetryPolicy};
use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Node;
use osc_client::{OscClientTrait, ResourceFilter, SecurityGroup, Vm};
use tracing::{debug, warn};

const PROVIDER_SCHEMES: [&str; 2] = ["osc://", "aws://"];

/// Parsed `spec.providerID`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderId {
    pub subregion: Option<String>,
    pub vm_id: String,
}

/// Parse `osc:///<subregion>/<vm id>` or `aws:///<subregion>/<vm id>`.
///
/// The subregion segment may be omitted (`osc:///<vm id>`).
pub fn parse_provider_id(provider_id: &str) -> Option<ProviderId> {
    let rest = PROVIDER_SCHEMES
        .iter()
        .find_map(|scheme| provider_id.strip_prefix(scheme))?;
    // Empty host: "osc:///..." leaves "/<subregion>/<vm id>"
    let path = rest.strip_prefix('/')?;
    let segments: Vec<&str> = path.split('/').collect();
    let (subregion, vm_id) = match segments.as_slice() {
        [vm_id] => (None, *vm_id),
        [subregion, vm_id] => (Some(subregion.to_string()), *vm_id),
        _ => return None,
    };
    if vm_id.is_empty() || subregion.as_deref() == Some("") {
        return None;
    }
    Some(ProviderId {
        subregion,
        vm_id: vm_id.to_string(),
    })
}

fn in_scope(scope: Option<&ClusterScope>, vm: &Vm) -> bool {
    scope.is_none_or(|s| s.in_scope(&vm.tags))
}

/// Find the VM of a node, by provider id first and `OscK8sNodeName` tag second.
///
/// Without a scope (at startup, before the cluster id is known) any VM matches.
pub async fn find_vm(
    osc: &(dyn OscClientTrait + Send + Sync),
    retry: &RetryPolicy,
    scope: Option<&ClusterScope>,
    node_name: &str,
    provider_id: Option<&str>,
) -> Result<Vm, ControllerError> {
    let read = |filter: ResourceFilter| async move {
        retry_transient(retry, "read VMs", || osc.read_vms(&filter))
            .await
            .map_err(|failure| ControllerError::Osc(failure.error))
    };

    if let Some(raw) = provider_id.filter(|p| !p.is_empty()) {
        match parse_provider_id(raw) {
            Some(parsed) => {
                let vms = read(ResourceFilter::new().id(parsed.vm_id.clone())).await?;
                if let Some(vm) = vms.into_iter().find(|vm| in_scope(scope, vm)) {
                    return Ok(vm);
                }
                debug!("VM {} of node {} not found in scope, trying node name tag", parsed.vm_id, node_name);
            }
            None => warn!("Node {} has unparseable provider ID {}", node_name, raw),
        }
    }

    let mut filter = ResourceFilter::new().tag(NODE_NAME_TAG, node_name);
    if let Some(scope) = scope {
        filter = filter.tag_key(scope.cluster_tag());
    }
    let mut vms: Vec<Vm> = read(filter)
        .await?
        .into_iter()
        .filter(|vm| in_scope(scope, vm))
        .collect();
    vms.sort_by(|a, b| a.vm_id.cmp(&b.vm_id));

    match Lookup::from_sorted(vms) {
        Lookup::Found(vm) => Ok(vm),
        Lookup::AmbiguousMultiple(mut vms) => {
            let vm = vms.remove(0);
            warn!(
                "{} VMs tagged {}={}; using {}",
                vms.len() + 1,
                NODE_NAME_TAG,
                node_name,
                vm.vm_id
            );
            Ok(vm)
        }
        Lookup::NotFound => Err(ControllerError::VMNotFound(format!(
            "node {} has no usable provider ID and no VM is tagged {}={}",
            node_name, NODE_NAME_TAG, node_name
        ))),
    }
}

impl Reconciler {
    /// Map a Node to its VM within the cluster scope.
    pub async fn resolve_vm(&self, node: &Node) -> Result<Vm, ControllerError> {
        let name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::VMNotFound("Node missing name".to_string()))?;
        let provider_id = node.spec.as_ref().and_then(|s| s.provider_id.as_deref());
        find_vm(self.osc.as_ref(), &self.retry, Some(&self.scope), name, provider_id).await
    }

    /// Security groups of the nodes with `role`.
    ///
    /// In-scope groups tagged `OscK8sRole/<role>` first, then the group tagged
    /// `OscK8sMainSG/<cluster id>`. `NotFound` is not an error: the Service
    /// simply has no linkage rule to add yet.
    pub async fn resolve_node_security_group(&self, role: &str) -> Result<Lookup<SecurityGroup>, ControllerError> {
        let role_filter = self.scope.filter().tag_key(role_tag(role));
        let by_role: Vec<SecurityGroup> = self
            .query("read node security groups", || self.osc.read_security_groups(&role_filter))
            .await?
            .into_iter()
            .filter(|sg| self.scope.in_scope(&sg.tags))
            .collect();
        if !by_role.is_empty() {
            return Ok(Lookup::from_sorted(sorted(by_role)));
        }

        let main_filter = self.scope.filter().tag_key(self.scope.main_sg_tag());
        let main: Vec<SecurityGroup> = self
            .query("read main security group", || self.osc.read_security_groups(&main_filter))
            .await?
            .into_iter()
            .filter(|sg| self.scope.in_scope(&sg.tags))
            .collect();
        if main.is_empty() {
            debug!("No security group for role {} nor main security group", role);
        }
        Ok(Lookup::from_sorted(sorted(main)))
    }
}

fn sorted(mut groups: Vec<SecurityGroup>) -> Vec<SecurityGroup> {
    groups.sort_by(|a, b| a.security_group_id.cmp(&b.security_group_id));
    groups
}
