//! OscClient trait for mocking
//!
//! This trait abstracts the Outscale API so the controller's resolvers and
//! reconcilers can run against an in-memory mock in unit tests.
//!
//! Contract expected by callers:
//! - `Read*` calls are tag/filter scoped and may lag behind recent writes.
//! - Creating a rule or listener that already exists succeeds.
//! - Creating a named security group or load balancer that already exists
//!   returns the existing object.
//! - Removing an object that is already absent succeeds.

use crate::common::filters::ResourceFilter;
use crate::error::OscError;
use crate::models::*;

/// Trait for Outscale API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait OscClientTrait: Send + Sync {
    /// Get the region the client targets
    fn region(&self) -> &str;

    // Compute
    async fn read_vms(&self, filter: &ResourceFilter) -> Result<Vec<Vm>, OscError>;
    async fn read_subregions(&self) -> Result<Vec<Subregion>, OscError>;

    // Network
    async fn read_subnets(&self, filter: &ResourceFilter) -> Result<Vec<Subnet>, OscError>;
    async fn read_route_tables(&self, filter: &ResourceFilter) -> Result<Vec<RouteTable>, OscError>;
    async fn read_public_ips(&self, filter: &ResourceFilter) -> Result<Vec<PublicIp>, OscError>;
    async fn create_tags(
        &self,
        resource_ids: &[String],
        tags: &[ResourceTag],
    ) -> Result<(), OscError>;

    // Security groups
    async fn read_security_groups(
        &self,
        filter: &ResourceFilter,
    ) -> Result<Vec<SecurityGroup>, OscError>;
    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        net_id: Option<&str>,
    ) -> Result<SecurityGroup, OscError>;
    async fn delete_security_group(&self, security_group_id: &str) -> Result<(), OscError>;
    async fn create_security_group_rules(
        &self,
        security_group_id: &str,
        flow: Flow,
        rules: &[SecurityGroupRule],
    ) -> Result<(), OscError>;
    async fn delete_security_group_rules(
        &self,
        security_group_id: &str,
        flow: Flow,
        rules: &[SecurityGroupRule],
    ) -> Result<(), OscError>;

    // Load balancers
    async fn read_load_balancers(
        &self,
        filter: &ResourceFilter,
    ) -> Result<Vec<LoadBalancer>, OscError>;
    async fn create_load_balancer(
        &self,
        request: &CreateLoadBalancerRequest,
    ) -> Result<LoadBalancer, OscError>;
    async fn delete_load_balancer(&self, name: &str) -> Result<(), OscError>;
    async fn update_load_balancer_security_groups(
        &self,
        name: &str,
        security_group_ids: &[String],
    ) -> Result<(), OscError>;
    async fn create_load_balancer_listeners(
        &self,
        name: &str,
        listeners: &[Listener],
    ) -> Result<(), OscError>;
    async fn delete_load_balancer_listeners(
        &self,
        name: &str,
        load_balancer_ports: &[i32],
    ) -> Result<(), OscError>;
    async fn register_vms_in_load_balancer(
        &self,
        name: &str,
        vm_ids: &[String],
    ) -> Result<(), OscError>;
    async fn deregister_vms_in_load_balancer(
        &self,
        name: &str,
        vm_ids: &[String],
    ) -> Result<(), OscError>;
}
