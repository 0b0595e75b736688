//! Unit tests for the security group reconciler

#[cfg(test)]
mod tests {
    use super::super::placement::LbuPlan;
    use super::super::rules::{self, RulePermission, RuleSource};
    use super::super::scope::{role_tag, Ownership, SERVICE_TAG};
    use super::super::security_group::*;
    use super::super::MutationLog;
    use crate::annotations;
    use crate::error::ControllerError;
    use crate::intent::ServiceIntent;
    use crate::test_utils::*;
    use osc_client::{tag_value, InjectedFailure, MockOscClient, SecurityGroup};

    fn intent(annotations: &[(&str, &str)], ports: &[(i32, i32)]) -> ServiceIntent {
        let svc = create_test_service("web", "default", annotations, ports);
        ServiceIntent::from_service(&svc).unwrap()
    }

    fn lbu() -> LbuPlan {
        LbuPlan {
            index: 0,
            name: TEST_LB_NAME.to_string(),
            requested_subregion: "eu-west-2a".to_string(),
            subregion: "eu-west-2a".to_string(),
            subnet_id: "subnet-a".to_string(),
            net_id: TEST_NET.to_string(),
            public_ip_id: None,
            fallback: false,
        }
    }

    fn cidr(port: i32, range: &str) -> RulePermission {
        RulePermission::tcp_port(port, RuleSource::Cidr(range.to_string()))
    }

    fn inbound(mock: &MockOscClient, id: &str) -> Vec<RulePermission> {
        let sg = mock.security_group(id).unwrap();
        rules::permissions(&sg.inbound_rules).into_iter().collect()
    }

    /// Managed ingress group with the given inbound rules, as left by an earlier pass
    fn managed_group(rules: Vec<osc_client::SecurityGroupRule>) -> SecurityGroup {
        let mut sg = create_test_security_group("sg-ingress", "k8s-elb-web", false, &[]);
        sg.tags.push(osc_client::ResourceTag::new(SERVICE_TAG, "default/web"));
        sg.inbound_rules = rules;
        sg
    }

    #[tokio::test]
    async fn test_creates_tagged_group_with_rules() {
        let mock = MockOscClient::new(TEST_REGION);
        let reconciler = create_test_reconciler(&mock, 1);
        let intent = intent(&[], &[(80, 30080), (443, 30443)]);
        let mut log = MutationLog::default();

        let existing = reconciler.find_ingress_group(&intent).await.unwrap();
        assert!(existing.is_none());
        let ingress = reconciler
            .reconcile_ingress_sg(&intent, &[lbu()], existing, &mut log)
            .await
            .unwrap();
        assert_eq!(ingress.ownership, Ownership::Owned);

        let sg = mock.security_group(&ingress.security_group_id).unwrap();
        assert_eq!(sg.security_group_name, ingress_group_name(TEST_LB_NAME));
        assert_eq!(sg.net_id.as_deref(), Some(TEST_NET));
        assert_eq!(tag_value(&sg.tags, SERVICE_TAG), Some("default/web"));
        assert_eq!(tag_value(&sg.tags, "OscK8sClusterID/c1"), Some("owned"));
        assert_eq!(
            inbound(&mock, &ingress.security_group_id),
            vec![cidr(80, "0.0.0.0/0"), cidr(443, "0.0.0.0/0")]
        );
        assert_eq!(log.applied.len(), 3);
    }

    #[tokio::test]
    async fn test_second_pass_issues_no_mutation() {
        let mock = MockOscClient::new(TEST_REGION);
        let reconciler = create_test_reconciler(&mock, 1);
        let intent = intent(&[], &[(80, 30080)]);

        let existing = reconciler.find_ingress_group(&intent).await.unwrap();
        reconciler
            .reconcile_ingress_sg(&intent, &[lbu()], existing, &mut MutationLog::default())
            .await
            .unwrap();
        mock.clear_mutations();

        let mut log = MutationLog::default();
        let existing = reconciler.find_ingress_group(&intent).await.unwrap();
        assert!(existing.is_some());
        reconciler
            .reconcile_ingress_sg(&intent, &[lbu()], existing, &mut log)
            .await
            .unwrap();
        assert_eq!(mock.mutation_count(), 0);
        assert!(log.applied.is_empty());
    }

    #[tokio::test]
    async fn test_source_range_change_applies_only_the_delta() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.add_security_group(managed_group(vec![cidr_rule(80, "0.0.0.0/0")]));
        let reconciler = create_test_reconciler(&mock, 1);
        let mut svc = create_test_service("web", "default", &[], &[(80, 30080)]);
        svc.spec.as_mut().unwrap().load_balancer_source_ranges = Some(vec!["10.0.0.0/8".to_string()]);
        let intent = ServiceIntent::from_service(&svc).unwrap();

        let existing = reconciler.find_ingress_group(&intent).await.unwrap();
        reconciler
            .reconcile_ingress_sg(&intent, &[lbu()], existing, &mut MutationLog::default())
            .await
            .unwrap();

        assert_eq!(inbound(&mock, "sg-ingress"), vec![cidr(80, "10.0.0.0/8")]);
        assert_eq!(
            mock.mutations(),
            vec![
                "CreateSecurityGroupRule sg-ingress".to_string(),
                "DeleteSecurityGroupRule sg-ingress".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_annotated_group_must_exist_in_scope() {
        let mock = MockOscClient::new(TEST_REGION);
        let mut foreign = create_test_security_group("sg-foreign", "foreign", false, &[]);
        foreign.tags = tags(&[("OscK8sClusterID/c2", "owned")]);
        mock.add_security_group(foreign);
        let reconciler = create_test_reconciler(&mock, 1);

        for id in ["sg-missing", "sg-foreign"] {
            let intent = intent(&[(annotations::SECURITY_GROUP, id)], &[(80, 30080)]);
            assert!(matches!(
                reconciler.find_ingress_group(&intent).await,
                Err(ControllerError::SGNotFound(_))
            ));
        }
        assert_eq!(mock.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_shared_group_only_gets_rules_added() {
        let mock = MockOscClient::new(TEST_REGION);
        let mut shared = create_test_security_group("sg-shared", "shared-ingress", true, &[]);
        shared.inbound_rules = vec![cidr_rule(22, "192.168.0.0/16")];
        mock.add_security_group(shared);
        let reconciler = create_test_reconciler(&mock, 1);
        let intent = intent(&[(annotations::SECURITY_GROUP, "sg-shared")], &[(80, 30080)]);

        let existing = reconciler.find_ingress_group(&intent).await.unwrap();
        let ingress = reconciler
            .reconcile_ingress_sg(&intent, &[lbu()], existing, &mut MutationLog::default())
            .await
            .unwrap();
        assert_eq!(ingress.ownership, Ownership::Shared);
        assert_eq!(
            inbound(&mock, "sg-shared"),
            vec![cidr(22, "192.168.0.0/16"), cidr(80, "0.0.0.0/0")]
        );
        assert_eq!(mock.mutations(), vec!["CreateSecurityGroupRule sg-shared".to_string()]);
    }

    #[tokio::test]
    async fn test_node_linkage_is_additive() {
        let mock = MockOscClient::new(TEST_REGION);
        let mut node_sg = create_test_security_group("sg-worker", "worker", true, &[&role_tag("worker")]);
        node_sg.inbound_rules = vec![cidr_rule(22, "10.0.0.0/16"), group_rule(30080, "sg-other-lb")];
        mock.add_security_group(node_sg);
        let reconciler = create_test_reconciler(&mock, 1);
        let intent = intent(&[], &[(80, 30080), (443, 30443)]);
        let ingress = IngressGroup {
            security_group_id: "sg-ingress".to_string(),
            ownership: Ownership::Owned,
        };

        let node_groups = vec![mock.security_group("sg-worker").unwrap()];
        reconciler
            .reconcile_node_linkage(&ingress, &node_groups, &intent.ports, &mut MutationLog::default())
            .await
            .unwrap();

        let rules = inbound(&mock, "sg-worker");
        assert_eq!(rules.len(), 4);
        assert!(rules.contains(&cidr(22, "10.0.0.0/16")));
        assert!(rules.contains(&RulePermission::tcp_port(30080, RuleSource::SecurityGroup("sg-other-lb".to_string()))));
        assert!(rules.contains(&RulePermission::tcp_port(30443, RuleSource::SecurityGroup("sg-ingress".to_string()))));

        mock.clear_mutations();
        let node_groups = vec![mock.security_group("sg-worker").unwrap()];
        reconciler
            .reconcile_node_linkage(&ingress, &node_groups, &intent.ports, &mut MutationLog::default())
            .await
            .unwrap();
        assert_eq!(mock.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_linkage_is_removed_only_for_owned_groups() {
        let mock = MockOscClient::new(TEST_REGION);
        let mut node_sg = create_test_security_group("sg-worker", "worker", true, &[&role_tag("worker")]);
        node_sg.inbound_rules = vec![
            cidr_rule(22, "10.0.0.0/16"),
            group_rule(30080, "sg-ingress"),
            group_rule(30080, "sg-other-lb"),
        ];
        mock.add_security_group(node_sg);
        let reconciler = create_test_reconciler(&mock, 1);
        let intent = intent(&[], &[(443, 30443)]);
        let shared = IngressGroup {
            security_group_id: "sg-ingress".to_string(),
            ownership: Ownership::Shared,
        };

        let node_groups = vec![mock.security_group("sg-worker").unwrap()];
        reconciler
            .reconcile_node_linkage(&shared, &node_groups, &intent.ports, &mut MutationLog::default())
            .await
            .unwrap();
        let rules = inbound(&mock, "sg-worker");
        assert_eq!(rules.len(), 4);
        assert!(rules.contains(&RulePermission::tcp_port(30080, RuleSource::SecurityGroup("sg-ingress".to_string()))));

        let owned = IngressGroup {
            ownership: Ownership::Owned,
            ..shared
        };
        mock.clear_mutations();
        let node_groups = vec![mock.security_group("sg-worker").unwrap()];
        reconciler
            .reconcile_node_linkage(&owned, &node_groups, &intent.ports, &mut MutationLog::default())
            .await
            .unwrap();

        assert_eq!(mock.mutations(), vec!["DeleteSecurityGroupRule sg-worker".to_string()]);
        let rules = inbound(&mock, "sg-worker");
        assert_eq!(rules.len(), 3);
        assert!(rules.contains(&cidr(22, "10.0.0.0/16")));
        assert!(rules.contains(&RulePermission::tcp_port(30080, RuleSource::SecurityGroup("sg-other-lb".to_string()))));
        assert!(rules.contains(&RulePermission::tcp_port(30443, RuleSource::SecurityGroup("sg-ingress".to_string()))));
    }

    #[tokio::test]
    async fn test_throttled_rule_creation_is_retried() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.add_security_group(managed_group(vec![]));
        mock.fail_next("CreateSecurityGroupRule", InjectedFailure::Throttled, 2);
        let reconciler = create_test_reconciler(&mock, 3);
        let intent = intent(&[], &[(80, 30080)]);

        let existing = reconciler.find_ingress_group(&intent).await.unwrap();
        reconciler
            .reconcile_ingress_sg(&intent, &[lbu()], existing, &mut MutationLog::default())
            .await
            .unwrap();
        assert_eq!(inbound(&mock, "sg-ingress"), vec![cidr(80, "0.0.0.0/0")]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_partial_state() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.fail_next("CreateSecurityGroupRule", InjectedFailure::Conflict, 3);
        let reconciler = create_test_reconciler(&mock, 3);
        let intent = intent(&[], &[(80, 30080)]);
        let mut log = MutationLog::default();

        let err = reconciler
            .reconcile_ingress_sg(&intent, &[lbu()], None, &mut log)
            .await
            .unwrap_err();
        match err {
            ControllerError::ReconcileFailed { attempts, applied, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(applied.len(), 2);
                assert!(applied[0].starts_with("create security group k8s-elb-"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The next pass picks the tagged group up and converges
        let existing = reconciler.find_ingress_group(&intent).await.unwrap();
        assert!(existing.is_some());
        reconciler
            .reconcile_ingress_sg(&intent, &[lbu()], existing, &mut MutationLog::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_removes_linkage_then_group() {
        let mock = MockOscClient::new(TEST_REGION);
        mock.add_security_group(managed_group(vec![cidr_rule(80, "0.0.0.0/0")]));
        let mut node_sg = create_test_security_group("sg-worker", "worker", true, &[&role_tag("worker")]);
        node_sg.inbound_rules = vec![group_rule(30080, "sg-ingress"), cidr_rule(22, "10.0.0.0/16")];
        mock.add_security_group(node_sg);
        let reconciler = create_test_reconciler(&mock, 1);

        reconciler
            .cleanup_ingress_sg("default/web", &mut MutationLog::default())
            .await
            .unwrap();
        assert!(mock.security_group("sg-ingress").is_none());
        assert_eq!(inbound(&mock, "sg-worker"), vec![cidr(22, "10.0.0.0/16")]);
        assert_eq!(
            mock.mutations(),
            vec![
                "DeleteSecurityGroupRule sg-worker".to_string(),
                "DeleteSecurityGroup sg-ingress".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_never_deletes_shared_groups() {
        let mock = MockOscClient::new(TEST_REGION);
        let mut shared = create_test_security_group("sg-shared", "shared", true, &[]);
        shared.tags.push(osc_client::ResourceTag::new(SERVICE_TAG, "default/web"));
        mock.add_security_group(shared);
        let reconciler = create_test_reconciler(&mock, 1);

        reconciler
            .cleanup_ingress_sg("default/web", &mut MutationLog::default())
            .await
            .unwrap();
        assert!(mock.security_group("sg-shared").is_some());
        assert_eq!(mock.mutation_count(), 0);
    }
}
