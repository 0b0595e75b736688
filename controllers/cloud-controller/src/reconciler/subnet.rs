//! Subnet selection
//!
//! Subnets are read once per reconciliation into a [`SubnetInventory`]; the
//! selection itself is pure. Within one subregion, the first rule yielding a
//! candidate wins:
//!
//! 1. `OscK8sRole/service.internal` (internal Services only)
//! 2. `OscK8sRole/service`
//! 3. `OscK8sRole/loadbalancer`
//! 4. any subnet routed to an internet service (public subnet heuristic)
//!
//! Rules 1 to 3 only consider subnets tagged for the cluster.

use super::scope::role_tag;
use super::{Lookup, Reconciler};
use crate::error::ControllerError;
use crate::intent::ServiceIntent;
use osc_client::{RouteTable, ResourceFilter, Subnet};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

pub const ROLE_SERVICE: &str = "service";
pub const ROLE_SERVICE_INTERNAL: &str = "service.internal";
pub const ROLE_LOADBALANCER: &str = "loadbalancer";

/// Snapshot of the subnets a reconciliation may place load balancers in
#[derive(Debug, Clone, Default)]
pub struct SubnetInventory {
    /// Tagged for the cluster (`owned` or `shared`)
    scoped: Vec<Subnet>,
    /// Routed to an internet service, whatever their tags
    public: Vec<Subnet>,
    /// Every subnet read, for explicit subnet overrides
    known: Vec<Subnet>,
}

/// Ids of the subnets whose route table has an internet route.
///
/// A subnet without an explicit route table link uses the main table of its net.
pub fn public_subnet_ids(subnets: &[Subnet], route_tables: &[RouteTable]) -> HashSet<String> {
    subnets
        .iter()
        .filter(|subnet| {
            let linked = route_tables.iter().find(|rt| {
                rt.link_route_tables
                    .iter()
                    .any(|l| l.subnet_id.as_deref() == Some(subnet.subnet_id.as_str()))
            });
            let table = linked.or_else(|| {
                route_tables.iter().find(|rt| {
                    rt.net_id == subnet.net_id && rt.link_route_tables.iter().any(|l| l.main)
                })
            });
            table.is_some_and(|rt| rt.routes.iter().any(|r| r.is_internet_route()))
        })
        .map(|subnet| subnet.subnet_id.clone())
        .collect()
}

fn has_tag_key(subnet: &Subnet, key: &str) -> bool {
    subnet.tags.iter().any(|t| t.key == key)
}

fn sorted(mut subnets: Vec<Subnet>) -> Vec<Subnet> {
    subnets.sort_by(|a, b| a.subnet_id.cmp(&b.subnet_id));
    subnets
}

impl SubnetInventory {
    pub fn new(scoped: Vec<Subnet>, public: Vec<Subnet>, known: Vec<Subnet>) -> Self {
        Self {
            scoped: sorted(scoped),
            public: sorted(public),
            known: sorted(known),
        }
    }

    /// Role order tried for a Service
    pub fn roles(internal: bool) -> &'static [&'static str] {
        if internal {
            &[ROLE_SERVICE_INTERNAL, ROLE_SERVICE, ROLE_LOADBALANCER]
        } else {
            &[ROLE_SERVICE, ROLE_LOADBALANCER]
        }
    }

    /// Select the subnet of one load balancer instance in `subregion`.
    ///
    /// Never looks outside `subregion`; `NotFound` leaves the fallback decision
    /// to the caller.
    pub fn resolve_subnet(&self, intent: &ServiceIntent, subregion: &str) -> Lookup<Subnet> {
        self.resolve_in_subregion(intent.internal, subregion)
    }

    pub(crate) fn resolve_in_subregion(&self, internal: bool, subregion: &str) -> Lookup<Subnet> {
        for role in Self::roles(internal) {
            let key = role_tag(role);
            let candidates: Vec<Subnet> = self
                .scoped
                .iter()
                .filter(|s| s.subregion_name == subregion && has_tag_key(s, &key))
                .cloned()
                .collect();
            if !candidates.is_empty() {
                debug!("Subnet candidates in {} from role {}: {}", subregion, role, candidates.len());
                return Lookup::from_sorted(candidates);
            }
        }

        let public: Vec<Subnet> = self
            .public
            .iter()
            .filter(|s| s.subregion_name == subregion)
            .cloned()
            .collect();
        if !public.is_empty() {
            debug!("Public subnet heuristic in {}: {} candidate(s)", subregion, public.len());
        }
        Lookup::from_sorted(public)
    }

    /// Subregions holding at least one subnet, sorted
    pub fn subregions(&self) -> Vec<String> {
        self.known
            .iter()
            .chain(self.scoped.iter())
            .map(|s| s.subregion_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// A subnet named by an explicit override
    pub fn get(&self, subnet_id: &str) -> Option<&Subnet> {
        self.known
            .iter()
            .chain(self.scoped.iter())
            .find(|s| s.subnet_id == subnet_id)
    }
}

impl Reconciler {
    /// Read the subnets and route tables used for load balancer placement.
    pub async fn load_subnet_inventory(&self) -> Result<SubnetInventory, ControllerError> {
        let scoped_filter = self.scope.filter();
        let scoped = self
            .query("read cluster subnets", || self.osc.read_subnets(&scoped_filter))
            .await?
            .into_iter()
            .filter(|s| self.scope.in_scope(&s.tags))
            .collect();

        let mut net_filter = ResourceFilter::new();
        if let Some(net_id) = &self.scope.net_id {
            net_filter = net_filter.net_id(net_id.clone());
        }
        let known: Vec<Subnet> = self
            .query("read net subnets", || self.osc.read_subnets(&net_filter))
            .await?;
        let route_tables = self
            .query("read route tables", || self.osc.read_route_tables(&net_filter))
            .await?;

        let public_ids = public_subnet_ids(&known, &route_tables);
        let public = known
            .iter()
            .filter(|s| public_ids.contains(&s.subnet_id))
            .cloned()
            .collect();

        Ok(SubnetInventory::new(scoped, public, known))
    }
}
