//! Outscale Cloud Controller
//!
//! Cloud controller for Kubernetes clusters running on Outscale:
//! - LoadBalancer Services: LBU instances, ingress security groups and node
//!   linkage rules, scoped to the cluster by `OscK8sClusterID/<id>` tags
//! - Nodes: topology and instance type labels from their VM

mod annotations;
mod backoff;
mod config;
mod controller;
mod error;
mod events;
mod intent;
mod metrics;
mod reconciler;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        error!("A rustls crypto provider was already installed");
    }

    info!("Starting Outscale Cloud Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Region: {}", config.region);
    info!("  Endpoint: {}", config.endpoint.as_deref().unwrap_or("default"));
    info!("  Node: {}", config.node_name);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  API attempts: {}", config.max_attempts);
    info!("  Metrics: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
