//! Kubernetes Events on Services.
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! the reconciliation that produced it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Name shown as the reporting component of Events
pub const CONTROLLER_NAME: &str = "osc-cloud-controller-manager";

pub mod reasons {
    /// Load balancers of a Service are in sync
    pub const ENSURED_LOAD_BALANCER: &str = "EnsuredLoadBalancer";
    /// Load balancers of a deleted Service were removed
    pub const DELETED_LOAD_BALANCER: &str = "DeletedLoadBalancer";
}

pub mod actions {
    pub const ENSURE: &str = "EnsureLoadBalancer";
    pub const DELETE: &str = "EnsureLoadBalancerDeleted";
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}
