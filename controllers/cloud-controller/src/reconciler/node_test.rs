//! Unit tests for Node/VM and node security group resolution

#[cfg(test)]
mod tests {
    use super::super::scope::{role_tag, MAIN_SG_TAG_PREFIX, NODE_NAME_TAG};
    use super::super::Lookup;
    use crate::error::ControllerError;
    use crate::test_utils::*;
    use osc_client::{InjectedFailure, MockOscClient, ResourceTag};

    fn main_sg_tag() -> String {
        format!("{}{}", MAIN_SG_TAG_PREFIX, TEST_CLUSTER)
    }

    #[tokio::test]
    async fn test_resolve_vm_by_provider_id() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.add_vm(create_test_vm("i-00000001", "other-name", "eu-west-2a"));
        let reconciler = create_test_reconciler(&mock, 1);

        let node = create_test_node("worker-0", Some("osc:///eu-west-2a/i-00000001"));
        let vm = reconciler.resolve_vm(&node).await.unwrap();
        assert_eq!(vm.vm_id, "i-00000001");
    }

    #[tokio::test]
    async fn test_resolve_vm_by_legacy_provider_id() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.add_vm(create_test_vm("i-00000002", "worker-1", "eu-west-2b"));
        let reconciler = create_test_reconciler(&mock, 1);

        let node = create_test_node("worker-1", Some("aws:///eu-west-2b/i-00000002"));
        assert_eq!(reconciler.resolve_vm(&node).await.unwrap().vm_id, "i-00000002");
    }

    #[tokio::test]
    async fn test_resolve_vm_falls_back_to_node_name_tag() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.add_vm(create_test_vm("i-00000003", "worker-2", "eu-west-2a"));
        let reconciler = create_test_reconciler(&mock, 1);

        let unset = create_test_node("worker-2", None);
        assert_eq!(reconciler.resolve_vm(&unset).await.unwrap().vm_id, "i-00000003");

        let garbage = create_test_node("worker-2", Some("not-a-provider-id"));
        assert_eq!(reconciler.resolve_vm(&garbage).await.unwrap().vm_id, "i-00000003");

        let stale = create_test_node("worker-2", Some("osc:///eu-west-2a/i-deadbeef"));
        assert_eq!(reconciler.resolve_vm(&stale).await.unwrap().vm_id, "i-00000003");
    }

    #[tokio::test]
    async fn test_resolve_vm_not_found() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.add_vm(create_test_vm("i-00000004", "worker-3", "eu-west-2a"));
        let reconciler = create_test_reconciler(&mock, 1);

        let node = create_test_node("worker-9", None);
        assert!(matches!(
            reconciler.resolve_vm(&node).await,
            Err(ControllerError::VMNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_vm_ignores_other_clusters() {
        let mock = MockOscClient::new(TEST_REGION);
        let mut foreign = create_test_vm("i-00000005", "worker-4", "eu-west-2a");
        foreign.tags = tags(&[("OscK8sClusterID/c2", "owned"), (NODE_NAME_TAG, "worker-4")]);
        mock.add_vm(foreign);
        let reconciler = create_test_reconciler(&mock, 1);

        let node = create_test_node("worker-4", Some("osc:///eu-west-2a/i-00000005"));
        assert!(matches!(
            reconciler.resolve_vm(&node).await,
            Err(ControllerError::VMNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_vm_retries_throttled_reads() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.add_vm(create_test_vm("i-00000006", "worker-5", "eu-west-2a"));
        mock.fail_next("ReadVms", InjectedFailure::Throttled, 2);
        let reconciler = create_test_reconciler(&mock, 3);

        let node = create_test_node("worker-5", None);
        assert_eq!(reconciler.resolve_vm(&node).await.unwrap().vm_id, "i-00000006");
    }

    #[tokio::test]
    async fn test_node_security_group_by_role() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.add_security_group(create_test_security_group("sg-worker", "worker", true, &[&role_tag("worker")]));
        mock.add_security_group(create_test_security_group("sg-main", "main", true, &[&main_sg_tag()]));
        let reconciler = create_test_reconciler(&mock, 1);

        let lookup = reconciler.resolve_node_security_group("worker").await.unwrap();
        assert_eq!(lookup.first().map(|sg| sg.security_group_id), Some("sg-worker".to_string()));
    }

    #[tokio::test]
    async fn test_node_security_group_falls_back_to_main_group() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.add_security_group(create_test_security_group("sg-worker", "worker", true, &[&role_tag("worker")]));
        mock.add_security_group(create_test_security_group("sg-main", "main", true, &[&main_sg_tag()]));
        let reconciler = create_test_reconciler(&mock, 1);

        let lookup = reconciler.resolve_node_security_group("edge").await.unwrap();
        assert_eq!(lookup.first().map(|sg| sg.security_group_id), Some("sg-main".to_string()));
    }

    #[tokio::test]
    async fn test_main_group_must_be_in_scope() {
        let mock = MockOscClient::new(TEST_REGION);
        let mut untagged = create_test_security_group("sg-main", "main", true, &[&main_sg_tag()]);
        untagged.tags.remove(0);
        mock.add_security_group(untagged);
        let reconciler = create_test_reconciler(&mock, 1);

        let lookup = reconciler.resolve_node_security_group("worker").await.unwrap();
        assert_eq!(lookup, Lookup::NotFound);
    }

    #[tokio::test]
    async fn test_node_security_group_not_found_is_not_an_error() {
        let mock = MockOscClient::new(TEST_REGION);
        let mut foreign = create_test_security_group("sg-foreign", "edge", true, &[&role_tag("edge")]);
        foreign.tags[0] = ResourceTag::new("OscK8sClusterID/c2", "owned");
        mock.add_security_group(foreign);
        let reconciler = create_test_reconciler(&mock, 1);

        let lookup = reconciler.resolve_node_security_group("edge").await.unwrap();
        assert_eq!(lookup, Lookup::NotFound);
    }
}
