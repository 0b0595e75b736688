//! Outscale API client
//!
//! Implements the Outscale OAPI calls the cloud controller needs.
//! Every call is a signed `POST <endpoint>/<Operation>` with a JSON body.

use crate::common::filters::{FilterKind, ResourceFilter};
use crate::common::signing::Credentials;
use crate::common::HttpClient;
use crate::error::OscError;
use crate::models::*;
use crate::osc_trait::OscClientTrait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReadVmsResponse {
    #[serde(default)]
    vms: Vec<Vm>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReadSubregionsResponse {
    #[serde(default)]
    subregions: Vec<Subregion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReadSubnetsResponse {
    #[serde(default)]
    subnets: Vec<Subnet>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReadRouteTablesResponse {
    #[serde(default)]
    route_tables: Vec<RouteTable>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReadPublicIpsResponse {
    #[serde(default)]
    public_ips: Vec<PublicIp>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReadSecurityGroupsResponse {
    #[serde(default)]
    security_groups: Vec<SecurityGroup>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSecurityGroupResponse {
    security_group: SecurityGroup,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReadLoadBalancersResponse {
    #[serde(default)]
    load_balancers: Vec<LoadBalancer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateLoadBalancerResponse {
    load_balancer: LoadBalancer,
}

/// Response of calls that only return a request context
#[derive(Deserialize)]
struct EmptyResponse {}

/// Outscale API client
pub struct OscClient {
    http: HttpClient,
}

impl OscClient {
    /// Create a new Outscale client
    ///
    /// # Arguments
    /// * `region` - Outscale region, e.g. `eu-west-2`
    /// * `endpoint` - API root; defaults to `https://api.<region>.outscale.com/api/v1`
    /// * `credentials` - Access key pair used to sign every request
    pub fn new(
        region: String,
        endpoint: Option<String>,
        credentials: Credentials,
    ) -> Result<Self, OscError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(OscError::Http)?;

        let endpoint = endpoint.unwrap_or_else(|| default_endpoint(&region));
        let http = HttpClient::new(client, &endpoint, region, credentials)?;

        Ok(Self { http })
    }

    /// Get the API endpoint
    pub fn endpoint(&self) -> &str {
        self.http.endpoint()
    }

    /// Validate credentials and connectivity with a cheap read call
    pub async fn validate_credentials(&self) -> Result<(), OscError> {
        debug!("Validating Outscale credentials and connectivity");
        self.read_subregions().await?;
        debug!("Credentials validated successfully");
        Ok(())
    }
}

/// Default OAPI endpoint for a region
pub fn default_endpoint(region: &str) -> String {
    format!("https://api.{}.outscale.com/api/v1", region)
}

/// Treat "already absent" as success for removals
fn ignore_not_found(result: Result<EmptyResponse, OscError>) -> Result<(), OscError> {
    match result {
        Ok(_) | Err(OscError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait::async_trait]
impl OscClientTrait for OscClient {
    fn region(&self) -> &str {
        self.http.region()
    }

    async fn read_vms(&self, filter: &ResourceFilter) -> Result<Vec<Vm>, OscError> {
        let body = json!({ "Filters": filter.to_oapi(FilterKind::Vm) });
        let response: ReadVmsResponse = self.http.call("ReadVms", &body).await?;
        Ok(response.vms)
    }

    async fn read_subregions(&self) -> Result<Vec<Subregion>, OscError> {
        let response: ReadSubregionsResponse = self.http.call("ReadSubregions", &json!({})).await?;
        Ok(response.subregions)
    }

    async fn read_subnets(&self, filter: &ResourceFilter) -> Result<Vec<Subnet>, OscError> {
        let body = json!({ "Filters": filter.to_oapi(FilterKind::Subnet) });
        let response: ReadSubnetsResponse = self.http.call("ReadSubnets", &body).await?;
        Ok(response.subnets)
    }

    async fn read_route_tables(&self, filter: &ResourceFilter) -> Result<Vec<RouteTable>, OscError> {
        let body = json!({ "Filters": filter.to_oapi(FilterKind::RouteTable) });
        let response: ReadRouteTablesResponse = self.http.call("ReadRouteTables", &body).await?;
        Ok(response.route_tables)
    }

    async fn read_public_ips(&self, filter: &ResourceFilter) -> Result<Vec<PublicIp>, OscError> {
        let body = json!({ "Filters": filter.to_oapi(FilterKind::PublicIp) });
        let response: ReadPublicIpsResponse = self.http.call("ReadPublicIps", &body).await?;
        Ok(response.public_ips)
    }

    async fn create_tags(&self, resource_ids: &[String], tags: &[ResourceTag]) -> Result<(), OscError> {
        let body = json!({ "ResourceIds": resource_ids, "Tags": tags });
        let _: EmptyResponse = self.http.call("CreateTags", &body).await?;
        Ok(())
    }

    async fn read_security_groups(&self, filter: &ResourceFilter) -> Result<Vec<SecurityGroup>, OscError> {
        let body = json!({ "Filters": filter.to_oapi(FilterKind::SecurityGroup) });
        let response: ReadSecurityGroupsResponse = self.http.call("ReadSecurityGroups", &body).await?;
        Ok(response.security_groups)
    }

    async fn create_security_group(&self, name: &str, description: &str, net_id: Option<&str>) -> Result<SecurityGroup, OscError> {
        let mut body = json!({
            "SecurityGroupName": name,
            "Description": description,
        });
        if let Some(net_id) = net_id {
            body["NetId"] = json!(net_id);
        }

        match self.http.call::<CreateSecurityGroupResponse>("CreateSecurityGroup", &body).await {
            Ok(response) => Ok(response.security_group),
            Err(OscError::AlreadyExists(msg)) => {
                // Create-or-get: a previous attempt may have succeeded.
                debug!("Security group {} already exists ({}), reading it back", name, msg);
                let mut filter = ResourceFilter::new().name(name);
                if let Some(net_id) = net_id {
                    filter = filter.net_id(net_id);
                }
                self.read_security_groups(&filter)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| OscError::NotFound(format!("Security group {} not found after create", name)))
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_security_group(&self, security_group_id: &str) -> Result<(), OscError> {
        let body = json!({ "SecurityGroupId": security_group_id });
        ignore_not_found(self.http.call("DeleteSecurityGroup", &body).await)
    }

    async fn create_security_group_rules(&self, security_group_id: &str, flow: Flow, rules: &[SecurityGroupRule]) -> Result<(), OscError> {
        let body = json!({
            "SecurityGroupId": security_group_id,
            "Flow": flow,
            "Rules": rules,
        });
        match self.http.call::<EmptyResponse>("CreateSecurityGroupRule", &body).await {
            Ok(_) | Err(OscError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_security_group_rules(&self, security_group_id: &str, flow: Flow, rules: &[SecurityGroupRule]) -> Result<(), OscError> {
        let body = json!({
            "SecurityGroupId": security_group_id,
            "Flow": flow,
            "Rules": rules,
        });
        ignore_not_found(self.http.call("DeleteSecurityGroupRule", &body).await)
    }

    async fn read_load_balancers(&self, filter: &ResourceFilter) -> Result<Vec<LoadBalancer>, OscError> {
        let body = json!({ "Filters": filter.to_oapi(FilterKind::LoadBalancer) });
        let response: ReadLoadBalancersResponse = self.http.call("ReadLoadBalancers", &body).await?;
        // ReadLoadBalancers only filters by name server-side.
        let local = ResourceFilter {
            ids: Vec::new(),
            names: Vec::new(),
            ..filter.clone()
        };
        Ok(response
            .load_balancers
            .into_iter()
            .filter(|lb| local.matches(lb))
            .collect())
    }

    async fn create_load_balancer(&self, request: &CreateLoadBalancerRequest) -> Result<LoadBalancer, OscError> {
        let body = serde_json::to_value(request)?;
        match self.http.call::<CreateLoadBalancerResponse>("CreateLoadBalancer", &body).await {
            Ok(response) => Ok(response.load_balancer),
            Err(OscError::AlreadyExists(msg)) => {
                debug!("Load balancer {} already exists ({}), reading it back", request.load_balancer_name, msg);
                self.read_load_balancers(&ResourceFilter::new().name(&request.load_balancer_name))
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| OscError::NotFound(format!("Load balancer {} not found after create", request.load_balancer_name)))
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_load_balancer(&self, name: &str) -> Result<(), OscError> {
        let body = json!({ "LoadBalancerName": name });
        ignore_not_found(self.http.call("DeleteLoadBalancer", &body).await)
    }

    async fn update_load_balancer_security_groups(&self, name: &str, security_group_ids: &[String]) -> Result<(), OscError> {
        let body = json!({
            "LoadBalancerName": name,
            "SecurityGroups": security_group_ids,
        });
        let _: EmptyResponse = self.http.call("UpdateLoadBalancer", &body).await?;
        Ok(())
    }

    async fn create_load_balancer_listeners(&self, name: &str, listeners: &[Listener]) -> Result<(), OscError> {
        let body = json!({
            "LoadBalancerName": name,
            "Listeners": listeners,
        });
        match self.http.call::<EmptyResponse>("CreateLoadBalancerListeners", &body).await {
            Ok(_) | Err(OscError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_load_balancer_listeners(&self, name: &str, load_balancer_ports: &[i32]) -> Result<(), OscError> {
        let body = json!({
            "LoadBalancerName": name,
            "LoadBalancerPorts": load_balancer_ports,
        });
        ignore_not_found(self.http.call("DeleteLoadBalancerListeners", &body).await)
    }

    async fn register_vms_in_load_balancer(&self, name: &str, vm_ids: &[String]) -> Result<(), OscError> {
        let body = json!({
            "LoadBalancerName": name,
            "BackendVmIds": vm_ids,
        });
        let _: EmptyResponse = self.http.call("RegisterVmsInLoadBalancer", &body).await?;
        Ok(())
    }

    async fn deregister_vms_in_load_balancer(&self, name: &str, vm_ids: &[String]) -> Result<(), OscError> {
        let body = json!({
            "LoadBalancerName": name,
            "BackendVmIds": vm_ids,
        });
        ignore_not_found(self.http.call("DeregisterVmsInLoadBalancer", &body).await)
    }
}
