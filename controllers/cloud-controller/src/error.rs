//! Controller-specific error types.
//!
//! Resolution errors (scope, subnets, VMs, user input) are raised before any
//! cloud mutation. `ReconcileFailed` is the only variant raised after the
//! first mutation and carries what was applied before the failure.

use kube::Error as KubeError;
use osc_client::OscError;
use thiserror::Error;

/// Errors that can occur in the cloud controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Outscale API error outside of a mutation
    #[error("Outscale error: {0}")]
    Osc(#[from] OscError),

    /// The controller's own VM carries no (or several) cluster IDs
    #[error("Cluster scope unresolved: {0}")]
    ScopeUnresolved(String),

    /// No subnet can host a load balancer instance
    #[error("Subnet not found: {0}")]
    SubnetNotFound(String),

    /// Security group absent or outside the cluster scope
    #[error("Security group not found: {0}")]
    SGNotFound(String),

    /// Node cannot be mapped to a VM
    #[error("VM not found: {0}")]
    VMNotFound(String),

    /// Public IP referenced by an annotation does not exist
    #[error("Public IP not found: {0}")]
    PublicIpNotFound(String),

    /// Instance count changed after the load balancers were created
    #[error("Instance count of Service {service} is immutable: {existing} load balancer instance(s) exist, {requested} requested")]
    ImmutableInstanceCount {
        service: String,
        existing: usize,
        requested: usize,
    },

    /// Per-instance override list does not match the instance count
    #[error("{field} lists {actual} value(s) but the Service requests {expected} instance(s)")]
    InstanceOverrideMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// Mutation failed after retries; earlier mutations stay applied
    #[error("Reconciliation failed at '{operation}' after {attempts} attempt(s): {source} (applied before failure: {})", applied.len())]
    ReconcileFailed {
        operation: String,
        attempts: u32,
        applied: Vec<String>,
        #[source]
        source: OscError,
    },

    /// Malformed Service annotation
    #[error("Invalid annotation {key}={value}: {reason}")]
    InvalidAnnotation {
        key: String,
        value: String,
        reason: String,
    },

    /// Service spec that cannot be served by a load balancer
    #[error("Invalid Service: {0}")]
    InvalidService(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Finalizer add/remove or wrapped reconciliation failed
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<kube_runtime::finalizer::Error<ControllerError>>),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Metrics server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Errors caused by the Service definition; retrying will not help until it changes.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ControllerError::ImmutableInstanceCount { .. }
                | ControllerError::InstanceOverrideMismatch { .. }
                | ControllerError::InvalidAnnotation { .. }
                | ControllerError::InvalidService(_)
        )
    }

    /// Event reason shown on the Service
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerError::ScopeUnresolved(_) => "ScopeUnresolved",
            ControllerError::SubnetNotFound(_) => "SubnetNotFound",
            ControllerError::SGNotFound(_) => "SecurityGroupNotFound",
            ControllerError::VMNotFound(_) => "VMNotFound",
            ControllerError::PublicIpNotFound(_) => "PublicIpNotFound",
            ControllerError::ImmutableInstanceCount { .. } => "ImmutableInstanceCount",
            ControllerError::InstanceOverrideMismatch { .. } => "InstanceOverrideMismatch",
            ControllerError::ReconcileFailed { .. } => "ReconcileFailed",
            ControllerError::InvalidAnnotation { .. } => "InvalidAnnotation",
            ControllerError::InvalidService(_) => "InvalidService",
            _ => "SyncLoadBalancerFailed",
        }
    }
}
