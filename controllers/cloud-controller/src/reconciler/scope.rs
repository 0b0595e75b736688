//! Cluster scope and tag convention
//!
//! Every cloud resource the controller reads must carry
//! `OscK8sClusterID/<cluster id>` with value `owned` or `shared`. The cluster
//! id is read once at startup from the controller's own VM.

use crate::error::ControllerError;
use osc_client::{ResourceFilter, ResourceTag, Vm};
use std::collections::BTreeSet;

pub const CLUSTER_ID_TAG_PREFIX: &str = "OscK8sClusterID/";
pub const NODE_NAME_TAG: &str = "OscK8sNodeName";
pub const ROLE_TAG_PREFIX: &str = "OscK8sRole/";
pub const MAIN_SG_TAG_PREFIX: &str = "OscK8sMainSG/";
/// `<namespace>/<name>` of the Service a resource was created for
pub const SERVICE_TAG: &str = "OscK8sService";
/// Instance count a Service's load balancers were created with
pub const INSTANCE_COUNT_TAG: &str = "OscK8sInstanceCount";

pub const OWNED: &str = "owned";
pub const SHARED: &str = "shared";

/// What the cluster may do with a tagged resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// May be mutated and destroyed
    Owned,
    /// May be read and have rules added, never destroyed
    Shared,
}

/// Tag key for a role, e.g. `OscK8sRole/service`
pub fn role_tag(role: &str) -> String {
    format!("{}{}", ROLE_TAG_PREFIX, role)
}

/// Cluster identity every component filters by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterScope {
    pub cluster_id: String,
    /// Net of the controller's VM; narrows the public subnet heuristic
    pub net_id: Option<String>,
}

impl ClusterScope {
    pub fn new(cluster_id: impl Into<String>, net_id: Option<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            net_id,
        }
    }

    /// `OscK8sClusterID/<cluster id>`
    pub fn cluster_tag(&self) -> String {
        format!("{}{}", CLUSTER_ID_TAG_PREFIX, self.cluster_id)
    }

    /// `OscK8sMainSG/<cluster id>`
    pub fn main_sg_tag(&self) -> String {
        format!("{}{}", MAIN_SG_TAG_PREFIX, self.cluster_id)
    }

    /// Ownership of a resource, `None` when it is outside the cluster
    pub fn ownership(&self, tags: &[ResourceTag]) -> Option<Ownership> {
        let key = self.cluster_tag();
        match tags.iter().find(|t| t.key == key).map(|t| t.value.as_str()) {
            Some(OWNED) => Some(Ownership::Owned),
            Some(SHARED) => Some(Ownership::Shared),
            _ => None,
        }
    }

    pub fn in_scope(&self, tags: &[ResourceTag]) -> bool {
        self.ownership(tags).is_some()
    }

    /// Server-side filter narrowing reads to the cluster tag key
    pub fn filter(&self) -> ResourceFilter {
        ResourceFilter::new().tag_key(self.cluster_tag())
    }

    /// Tags stamped on resources the controller creates for a Service
    pub fn owned_tags(&self, service_key: &str) -> Vec<ResourceTag> {
        vec![
            ResourceTag::new(self.cluster_tag(), OWNED),
            ResourceTag::new(SERVICE_TAG, service_key),
        ]
    }
}

/// Derive the cluster scope from the controller's own VM.
///
/// Fails with `ScopeUnresolved` when the VM has no cluster tag or tags for
/// several clusters.
pub fn resolve_scope(self_vm: &Vm) -> Result<ClusterScope, ControllerError> {
    let ids: BTreeSet<&str> = self_vm
        .tags
        .iter()
        .filter(|t| t.value == OWNED || t.value == SHARED)
        .filter_map(|t| t.key.strip_prefix(CLUSTER_ID_TAG_PREFIX))
        .filter(|id| !id.is_empty())
        .collect();

    let mut ids = ids.into_iter();
    match (ids.next(), ids.next()) {
        (Some(id), None) => Ok(ClusterScope::new(id, self_vm.net_id.clone())),
        (None, _) => Err(ControllerError::ScopeUnresolved(format!(
            "VM {} has no {}<id> tag",
            self_vm.vm_id, CLUSTER_ID_TAG_PREFIX
        ))),
        (Some(first), Some(second)) => Err(ControllerError::ScopeUnresolved(format!(
            "VM {} is tagged for several clusters ({}, {}, ...)",
            self_vm.vm_id, first, second
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_with_tags(tags: &[(&str, &str)]) -> Vm {
        Vm {
            vm_id: "i-self".to_string(),
            net_id: Some("vpc-1".to_string()),
            tags: tags.iter().map(|(k, v)| ResourceTag::new(*k, *v)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolves_single_cluster_id() {
        let vm = vm_with_tags(&[("OscK8sClusterID/c1", "owned"), ("Name", "master-0")]);
        let scope = resolve_scope(&vm).unwrap();
        assert_eq!(scope.cluster_id, "c1");
        assert_eq!(scope.net_id.as_deref(), Some("vpc-1"));
    }

    #[test]
    fn test_missing_cluster_tag_is_unresolved() {
        let vm = vm_with_tags(&[("Name", "master-0")]);
        assert!(matches!(resolve_scope(&vm), Err(ControllerError::ScopeUnresolved(_))));
    }

    #[test]
    fn test_several_cluster_ids_are_unresolved() {
        let vm = vm_with_tags(&[("OscK8sClusterID/c1", "owned"), ("OscK8sClusterID/c2", "shared")]);
        assert!(matches!(resolve_scope(&vm), Err(ControllerError::ScopeUnresolved(_))));
    }

    #[test]
    fn test_unknown_tag_value_is_out_of_scope() {
        let scope = ClusterScope::new("c1", None);
        let tags = vec![ResourceTag::new("OscK8sClusterID/c1", "borrowed")];
        assert_eq!(scope.ownership(&tags), None);
        assert!(!scope.in_scope(&tags));

        let shared = vec![ResourceTag::new("OscK8sClusterID/c1", "shared")];
        assert_eq!(scope.ownership(&shared), Some(Ownership::Shared));
    }
}
