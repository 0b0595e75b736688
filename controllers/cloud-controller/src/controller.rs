//! Main controller implementation.
//!
//! Startup resolves the cluster scope from the VM the controller runs on,
//! then spawns the Service and Node watchers and the metrics server. The
//! controller runs until one of them exits.

use crate::backoff::RetryPolicy;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::events::KubeEventPublisher;
use crate::metrics::{self, Metrics};
use crate::reconciler::node::find_vm;
use crate::reconciler::scope::resolve_scope;
use crate::reconciler::Reconciler;
use crate::watcher::{self, Context};
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use osc_client::OscClient;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for LoadBalancer Services and Node labels.
pub struct Controller {
    service_watcher: JoinHandle<Result<(), ControllerError>>,
    node_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Outscale cloud controller");

        let kube_client = Client::try_default().await?;

        let osc_client = OscClient::new(
            config.region.clone(),
            config.endpoint.clone(),
            config.credentials.clone(),
        )?;

        info!("Validating Outscale credentials and connectivity...");
        osc_client.validate_credentials().await.map_err(|e| {
            error!("Failed to validate Outscale credentials: {}", e);
            error!("Please ensure:");
            error!("  1. OSC_ACCESS_KEY and OSC_SECRET_KEY are set correctly");
            error!("  2. OSC_REGION ({}) matches the account", config.region);
            error!("  3. The API is reachable at {}", osc_client.endpoint());
            ControllerError::Osc(e)
        })?;
        info!("Outscale credentials validated");

        let retry = RetryPolicy::new(config.max_attempts);

        // The cluster id comes from the tags of the VM this controller runs on
        let self_node = Api::<Node>::all(kube_client.clone()).get(&config.node_name).await?;
        let provider_id = self_node.spec.as_ref().and_then(|s| s.provider_id.as_deref());
        let self_vm = find_vm(&osc_client, &retry, None, &config.node_name, provider_id).await?;
        let scope = resolve_scope(&self_vm)?;
        info!(
            "Cluster {} resolved from VM {} (net {})",
            scope.cluster_id,
            self_vm.vm_id,
            scope.net_id.as_deref().unwrap_or("none")
        );

        let metrics = Arc::new(Metrics::new()?);
        let ctx = Arc::new(Context {
            reconciler: Arc::new(Reconciler::new(osc_client, scope, retry)),
            client: kube_client.clone(),
            events: Arc::new(KubeEventPublisher::new(kube_client)),
            metrics: metrics.clone(),
            namespace: config.namespace.clone(),
        });

        let service_watcher = {
            let ctx = ctx.clone();
            tokio::spawn(async move { watcher::watch_services(ctx).await })
        };
        let node_watcher = {
            let ctx = ctx.clone();
            tokio::spawn(async move { watcher::watch_nodes(ctx).await })
        };
        let metrics_server = {
            let addr = config.metrics_addr;
            tokio::spawn(async move { metrics::serve(addr, metrics).await })
        };

        Ok(Self {
            service_watcher,
            node_watcher,
            metrics_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Outscale cloud controller running");

        // Watchers run forever; any exit stops the controller
        tokio::select! {
            result = &mut self.service_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Service watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Service watcher error: {}", e)))?;
            }
            result = &mut self.node_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Node watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Node watcher error: {}", e)))?;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))??;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
        }

        Ok(())
    }
}
