//! Mock OscClient for unit testing
//!
//! This module provides a mock implementation of OscClientTrait that can be used
//! in unit tests without requiring Outscale credentials.
//!
//! The mock is organized into domain-specific modules:
//! - `compute.rs` - VMs and subregions
//! - `network.rs` - Subnets, route tables, public IPs and tags
//! - `security_groups.rs` - Security groups and their rules
//! - `load_balancers.rs` - Load balancers, listeners and backends
//! - `helpers.rs` - Rule expansion shared by the modules above
//!
//! Every mutating call is appended to a journal so tests can assert how many
//! (and which) mutations a reconciliation issued. Failures can be injected per
//! operation to exercise retry and partial-failure paths.

mod compute;
mod helpers;
mod load_balancers;
mod network;
mod security_groups;

use crate::common::filters::ResourceFilter;
use crate::error::OscError;
use crate::models::*;
use crate::osc_trait::OscClientTrait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Error kinds that can be injected into the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Throttled,
    Conflict,
    ServerError,
    Authentication,
}

impl InjectedFailure {
    fn to_error(self, operation: &str) -> OscError {
        match self {
            InjectedFailure::Throttled => OscError::Throttled(format!("{}: RequestLimitExceeded", operation)),
            InjectedFailure::Conflict => OscError::Conflict(format!("{}: conflict", operation)),
            InjectedFailure::ServerError => OscError::Api {
                status: 500,
                code: "2000".to_string(),
                message: format!("{}: InternalError", operation),
            },
            InjectedFailure::Authentication => OscError::Authentication(format!("{}: AccessDenied", operation)),
        }
    }
}

/// Mock OscClient for testing
///
/// This mock stores resources in memory and can be configured to return
/// specific responses for testing different scenarios.
#[derive(Clone)]
pub struct MockOscClient {
    pub(crate) region: String,
    // In-memory storage for resources
    pub(crate) vms: Arc<Mutex<HashMap<String, Vm>>>,
    pub(crate) subregions: Arc<Mutex<Vec<Subregion>>>,
    pub(crate) subnets: Arc<Mutex<HashMap<String, Subnet>>>,
    pub(crate) route_tables: Arc<Mutex<HashMap<String, RouteTable>>>,
    pub(crate) public_ips: Arc<Mutex<HashMap<String, PublicIp>>>,
    pub(crate) security_groups: Arc<Mutex<HashMap<String, SecurityGroup>>>,
    pub(crate) load_balancers: Arc<Mutex<HashMap<String, LoadBalancer>>>,
    // Journal of mutating calls ("Operation target")
    pub(crate) mutations: Arc<Mutex<Vec<String>>>,
    // Pending injected failures per operation name
    pub(crate) failures: Arc<Mutex<HashMap<String, VecDeque<InjectedFailure>>>>,
    // Counter for generating IDs
    pub(crate) next_id: Arc<Mutex<u64>>,
}

impl MockOscClient {
    /// Create a new mock client for a region
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            vms: Arc::new(Mutex::new(HashMap::new())),
            subregions: Arc::new(Mutex::new(Vec::new())),
            subnets: Arc::new(Mutex::new(HashMap::new())),
            route_tables: Arc::new(Mutex::new(HashMap::new())),
            public_ips: Arc::new(Mutex::new(HashMap::new())),
            security_groups: Arc::new(Mutex::new(HashMap::new())),
            load_balancers: Arc::new(Mutex::new(HashMap::new())),
            mutations: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Add a VM to the mock store (for test setup)
    pub fn add_vm(&self, vm: Vm) {
        self.vms.lock().unwrap().insert(vm.vm_id.clone(), vm);
    }

    /// Add a subregion to the mock store (for test setup)
    pub fn add_subregion(&self, name: impl Into<String>) {
        self.subregions.lock().unwrap().push(Subregion {
            subregion_name: name.into(),
            region_name: self.region.clone(),
            state: "available".to_string(),
        });
    }

    /// Add a subnet to the mock store (for test setup)
    pub fn add_subnet(&self, subnet: Subnet) {
        self.subnets.lock().unwrap().insert(subnet.subnet_id.clone(), subnet);
    }

    /// Add a route table to the mock store (for test setup)
    pub fn add_route_table(&self, route_table: RouteTable) {
        self.route_tables
            .lock()
            .unwrap()
            .insert(route_table.route_table_id.clone(), route_table);
    }

    /// Add a public IP to the mock store (for test setup)
    pub fn add_public_ip(&self, public_ip: PublicIp) {
        self.public_ips
            .lock()
            .unwrap()
            .insert(public_ip.public_ip_id.clone(), public_ip);
    }

    /// Add a security group to the mock store (for test setup)
    pub fn add_security_group(&self, security_group: SecurityGroup) {
        self.security_groups
            .lock()
            .unwrap()
            .insert(security_group.security_group_id.clone(), security_group);
    }

    /// Add a load balancer to the mock store (for test setup)
    pub fn add_load_balancer(&self, load_balancer: LoadBalancer) {
        self.load_balancers
            .lock()
            .unwrap()
            .insert(load_balancer.load_balancer_name.clone(), load_balancer);
    }

    /// Snapshot of a stored security group
    pub fn security_group(&self, id: &str) -> Option<SecurityGroup> {
        self.security_groups.lock().unwrap().get(id).cloned()
    }

    /// Snapshot of a stored load balancer
    pub fn load_balancer(&self, name: &str) -> Option<LoadBalancer> {
        self.load_balancers.lock().unwrap().get(name).cloned()
    }

    /// Snapshot of a stored VM
    pub fn vm(&self, id: &str) -> Option<Vm> {
        self.vms.lock().unwrap().get(id).cloned()
    }

    /// Mutating calls issued so far, in order
    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    /// Number of mutating calls issued so far
    pub fn mutation_count(&self) -> usize {
        self.mutations.lock().unwrap().len()
    }

    /// Forget the mutation journal (e.g. between two reconciliation passes)
    pub fn clear_mutations(&self) {
        self.mutations.lock().unwrap().clear();
    }

    /// Make the next `times` calls of `operation` fail with `failure`
    ///
    /// `operation` is the OAPI operation name, e.g. `CreateSecurityGroupRule`.
    pub fn fail_next(&self, operation: &str, failure: InjectedFailure, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(operation.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(failure);
        }
    }

    /// Pop a pending injected failure for an operation
    pub(crate) fn check_failure(&self, operation: &str) -> Result<(), OscError> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(operation).and_then(|q| q.pop_front()) {
            Some(failure) => Err(failure.to_error(operation)),
            None => Ok(()),
        }
    }

    /// Record a successful mutation
    pub(crate) fn record(&self, operation: &str, target: &str) {
        self.mutations
            .lock()
            .unwrap()
            .push(format!("{} {}", operation, target));
    }

    /// Generate next ID suffix
    pub(crate) fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        current
    }
}

#[async_trait::async_trait]
impl OscClientTrait for MockOscClient {
    fn region(&self) -> &str {
        &self.region
    }

    // Compute - delegated to compute module
    async fn read_vms(&self, filter: &ResourceFilter) -> Result<Vec<Vm>, OscError> {
        compute::read_vms(self, filter).await
    }

    async fn read_subregions(&self) -> Result<Vec<Subregion>, OscError> {
        compute::read_subregions(self).await
    }

    // Network - delegated to network module
    async fn read_subnets(&self, filter: &ResourceFilter) -> Result<Vec<Subnet>, OscError> {
        network::read_subnets(self, filter).await
    }

    async fn read_route_tables(&self, filter: &ResourceFilter) -> Result<Vec<RouteTable>, OscError> {
        network::read_route_tables(self, filter).await
    }

    async fn read_public_ips(&self, filter: &ResourceFilter) -> Result<Vec<PublicIp>, OscError> {
        network::read_public_ips(self, filter).await
    }

    async fn create_tags(&self, resource_ids: &[String], tags: &[ResourceTag]) -> Result<(), OscError> {
        network::create_tags(self, resource_ids, tags).await
    }

    // Security groups - delegated to security_groups module
    async fn read_security_groups(&self, filter: &ResourceFilter) -> Result<Vec<SecurityGroup>, OscError> {
        security_groups::read_security_groups(self, filter).await
    }

    async fn create_security_group(&self, name: &str, description: &str, net_id: Option<&str>) -> Result<SecurityGroup, OscError> {
        security_groups::create_security_group(self, name, description, net_id).await
    }

    async fn delete_security_group(&self, security_group_id: &str) -> Result<(), OscError> {
        security_groups::delete_security_group(self, security_group_id).await
    }

    async fn create_security_group_rules(&self, security_group_id: &str, flow: Flow, rules: &[SecurityGroupRule]) -> Result<(), OscError> {
        security_groups::create_security_group_rules(self, security_group_id, flow, rules).await
    }

    async fn delete_security_group_rules(&self, security_group_id: &str, flow: Flow, rules: &[SecurityGroupRule]) -> Result<(), OscError> {
        security_groups::delete_security_group_rules(self, security_group_id, flow, rules).await
    }

    // Load balancers - delegated to load_balancers module
    async fn read_load_balancers(&self, filter: &ResourceFilter) -> Result<Vec<LoadBalancer>, OscError> {
        load_balancers::read_load_balancers(self, filter).await
    }

    async fn create_load_balancer(&self, request: &CreateLoadBalancerRequest) -> Result<LoadBalancer, OscError> {
        load_balancers::create_load_balancer(self, request).await
    }

    async fn delete_load_balancer(&self, name: &str) -> Result<(), OscError> {
        load_balancers::delete_load_balancer(self, name).await
    }

    async fn update_load_balancer_security_groups(&self, name: &str, security_group_ids: &[String]) -> Result<(), OscError> {
        load_balancers::update_load_balancer_security_groups(self, name, security_group_ids).await
    }

    async fn create_load_balancer_listeners(&self, name: &str, listeners: &[Listener]) -> Result<(), OscError> {
        load_balancers::create_load_balancer_listeners(self, name, listeners).await
    }

    async fn delete_load_balancer_listeners(&self, name: &str, load_balancer_ports: &[i32]) -> Result<(), OscError> {
        load_balancers::delete_load_balancer_listeners(self, name, load_balancer_ports).await
    }

    async fn register_vms_in_load_balancer(&self, name: &str, vm_ids: &[String]) -> Result<(), OscError> {
        load_balancers::register_vms_in_load_balancer(self, name, vm_ids).await
    }

    async fn deregister_vms_in_load_balancer(&self, name: &str, vm_ids: &[String]) -> Result<(), OscError> {
        load_balancers::deregister_vms_in_load_balancer(self, name, vm_ids).await
    }
}
