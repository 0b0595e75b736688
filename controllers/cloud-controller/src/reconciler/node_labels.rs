//! Node placement labels
//!
//! Best-effort sync of the topology and instance type labels of a Node from
//! its VM. Only labels that differ are patched.

use super::Reconciler;
use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Node;
use osc_client::Vm;
use std::collections::BTreeMap;

pub const REGION_LABEL: &str = "topology.kubernetes.io/region";
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

/// Labels a Node running on `vm` should carry
pub fn desired_labels(region: &str, vm: &Vm) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(REGION_LABEL.to_string(), region.to_string());
    if !vm.placement.subregion_name.is_empty() {
        labels.insert(ZONE_LABEL.to_string(), vm.placement.subregion_name.clone());
    }
    if !vm.vm_type.is_empty() {
        labels.insert(INSTANCE_TYPE_LABEL.to_string(), vm.vm_type.clone());
    }
    labels
}

/// Labels to merge into the Node, `None` when it is already up to date
pub fn labels_to_patch(node: &Node, desired: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    let current = node.metadata.labels.as_ref();
    let changed: BTreeMap<String, String> = desired
        .iter()
        .filter(|(key, value)| current.and_then(|labels| labels.get(*key)) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    (!changed.is_empty()).then_some(changed)
}

impl Reconciler {
    /// Placement labels missing or outdated on a Node.
    pub async fn node_label_changes(&self, node: &Node) -> Result<Option<BTreeMap<String, String>>, ControllerError> {
        let vm = self.resolve_vm(node).await?;
        Ok(labels_to_patch(node, &desired_labels(self.region(), &vm)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use osc_client::MockOscClient;

    #[tokio::test]
    async fn test_labels_from_vm() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.add_vm(create_test_vm("i-00000001", "worker-0", "eu-west-2b"));
        let reconciler = create_test_reconciler(&mock, 1);

        let node = create_test_node("worker-0", Some("osc:///eu-west-2b/i-00000001"));
        let patch = reconciler.node_label_changes(&node).await.unwrap().unwrap();
        assert_eq!(patch.get(REGION_LABEL).map(String::as_str), Some("eu-west-2"));
        assert_eq!(patch.get(ZONE_LABEL).map(String::as_str), Some("eu-west-2b"));
        assert_eq!(patch.get(INSTANCE_TYPE_LABEL).map(String::as_str), Some("tinav5.c2r4p2"));
    }

    #[tokio::test]
    async fn test_up_to_date_node_is_not_patched() {
        let mock = MockOscClient::new(TEST_REGION);
        let vm = create_test_vm("i-00000001", "worker-0", "eu-west-2b");
        mock.add_vm(vm.clone());
        let reconciler = create_test_reconciler(&mock, 1);

        let mut node = create_test_node("worker-0", None);
        let mut labels = desired_labels(TEST_REGION, &vm);
        labels.insert("kubernetes.io/hostname".to_string(), "worker-0".to_string());
        node.metadata.labels = Some(labels);
        assert_eq!(reconciler.node_label_changes(&node).await.unwrap(), None);
    }

    #[test]
    fn test_only_changed_labels_are_patched() {
        let vm = create_test_vm("i-00000001", "worker-0", "eu-west-2b");
        let mut node = create_test_node("worker-0", None);
        let mut labels = desired_labels(TEST_REGION, &vm);
        labels.insert(ZONE_LABEL.to_string(), "eu-west-2a".to_string());
        node.metadata.labels = Some(labels);

        let patch = labels_to_patch(&node, &desired_labels(TEST_REGION, &vm)).unwrap();
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get(ZONE_LABEL).map(String::as_str), Some("eu-west-2b"));
    }
}
