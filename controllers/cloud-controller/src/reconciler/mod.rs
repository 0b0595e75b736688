//! Reconciliation engine for LoadBalancer Services.
//!
//! The engine is split by concern:
//! - `scope`: cluster identity and tag convention
//! - `subnet`: subnet selection per subregion
//! - `placement`: number and placement of load balancer instances
//! - `rules` / `security_group`: ingress group and node linkage rules
//! - `node`: Node to VM and node security group mapping
//! - `load_balancer`: the Service reconciliation built on the above
//! - `node_labels`: topology labels of nodes

pub mod load_balancer;
pub mod node;
pub mod node_labels;
pub mod placement;
pub mod rules;
pub mod scope;
pub mod security_group;
pub mod subnet;

#[cfg(test)]
mod node_test;
#[cfg(test)]
mod security_group_test;

use crate::backoff::{retry_transient, FibonacciBackoff, RetryPolicy};
use crate::error::ControllerError;
use osc_client::{OscClientTrait, OscError};
use scope::ClusterScope;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Result of a tag-based lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    /// Several candidates matched; sorted by id
    AmbiguousMultiple(Vec<T>),
}

impl<T> Lookup<T> {
    /// Classify candidates that are already sorted by id
    pub fn from_sorted(mut candidates: Vec<T>) -> Self {
        match candidates.len() {
            0 => Lookup::NotFound,
            1 => Lookup::Found(candidates.remove(0)),
            _ => Lookup::AmbiguousMultiple(candidates),
        }
    }

    /// The match, or the lowest-id candidate when ambiguous
    pub fn first(self) -> Option<T> {
        match self {
            Lookup::Found(item) => Some(item),
            Lookup::AmbiguousMultiple(items) => items.into_iter().next(),
            Lookup::NotFound => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Lookup::NotFound)
    }
}

/// Cloud changes applied during one reconciliation, in order
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MutationLog {
    pub applied: Vec<String>,
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(5, 300), // 5 seconds min, 5 minutes max
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles LoadBalancer Services and node placement against the Outscale API.
pub struct Reconciler {
    pub(crate) osc: Box<dyn OscClientTrait + Send + Sync>,
    pub(crate) scope: ClusterScope,
    pub(crate) retry: RetryPolicy,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("region", &self.osc.region())
            .field("scope", &self.scope)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        osc: impl OscClientTrait + Send + Sync + 'static,
        scope: ClusterScope,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            osc: Box::new(osc),
            scope,
            retry,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn region(&self) -> &str {
        self.osc.region()
    }

    /// Run a read call, retrying transient failures.
    pub(crate) async fn query<T, F, Fut>(&self, description: &str, call: F) -> Result<T, ControllerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OscError>>,
    {
        retry_transient(&self.retry, description, call)
            .await
            .map_err(|failure| ControllerError::Osc(failure.error))
    }

    /// Run a mutating call, retrying transient failures.
    ///
    /// On success the change is appended to `log`. On failure the error
    /// carries everything applied earlier in the same reconciliation.
    pub(crate) async fn mutate<T, F, Fut>(
        &self,
        log: &mut MutationLog,
        description: String,
        call: F,
    ) -> Result<T, ControllerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OscError>>,
    {
        match retry_transient(&self.retry, &description, call).await {
            Ok(value) => {
                debug!("Applied: {}", description);
                log.applied.push(description);
                Ok(value)
            }
            Err(failure) => {
                warn!(
                    "Giving up on '{}' after {} attempt(s); {} change(s) applied before",
                    description,
                    failure.attempts,
                    log.applied.len()
                );
                Err(ControllerError::ReconcileFailed {
                    operation: description,
                    attempts: failure.attempts,
                    applied: log.applied.clone(),
                    source: failure.error,
                })
            }
        }
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                let backoff_seconds = state.backoff.next_backoff_seconds();
                (backoff_seconds, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (60, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
