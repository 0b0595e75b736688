//! Kubernetes resource watchers.
//!
//! Services and Nodes are watched with `kube_runtime::Controller`, which
//! handles reconnection, debouncing and per-object queueing. Service
//! reconciliation runs behind a finalizer so load balancers are removed
//! before the Service object goes away.

use crate::error::ControllerError;
use crate::events::{actions, reasons, EventPublisher};
use crate::intent::ServiceIntent;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, Node, Service};
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::events::EventType;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::finalizer::{finalizer, Event as Finalizer};
use kube_runtime::{watcher, Controller};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Finalizer guarding the cloud resources of a LoadBalancer Service
pub const LB_FINALIZER: &str = "service.kubernetes.io/load-balancer-cleanup";

const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";
/// Periodic resync of a Service in sync, picks up node membership changes
const SERVICE_RESYNC: Duration = Duration::from_secs(300);
const NODE_RESYNC: Duration = Duration::from_secs(600);

/// State shared by every reconciliation
pub struct Context {
    pub reconciler: Arc<Reconciler>,
    pub client: Client,
    pub events: Arc<dyn EventPublisher>,
    pub metrics: Arc<Metrics>,
    /// Only Services of this namespace are watched when set
    pub namespace: Option<String>,
}

/// `namespace/name` of an object, `name` for cluster-scoped ones
pub fn resource_key<K: Resource>(obj: &K) -> String {
    match obj.meta().namespace.as_deref() {
        Some(ns) => format!("{}/{}", ns, obj.meta().name.as_deref().unwrap_or_default()),
        None => obj.meta().name.clone().unwrap_or_default(),
    }
}

/// Whether this controller provisions load balancers for the Service
pub fn wants_load_balancer(service: &Service) -> bool {
    service.spec.as_ref().is_some_and(|spec| {
        spec.type_.as_deref() == Some(SERVICE_TYPE_LOAD_BALANCER) && spec.load_balancer_class.is_none()
    })
}

pub fn has_finalizer(service: &Service) -> bool {
    service.finalizers().iter().any(|f| f == LB_FINALIZER)
}

/// Whether the published ingress differs from `ingress`
pub fn ingress_changed(service: &Service, ingress: &[LoadBalancerIngress]) -> bool {
    let current = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_deref())
        .unwrap_or_default();
    current != ingress
}

/// Generic watcher helper around `kube_runtime::Controller`.
///
/// Failed reconciliations are requeued with a Fibonacci backoff per object.
async fn watch_resource<K, F, Fut>(
    api: Api<K>,
    ctx: Arc<Context>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<K>, Arc<Context>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<Action, ControllerError>> + Send + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Context>| {
        let key = resource_key(obj.as_ref());
        ctx.reconciler.increment_error(&key);
        let (backoff_seconds, error_count) = ctx.reconciler.get_backoff_for_resource(&key);
        if error.is_user_error() {
            warn!("{} {} is invalid, retrying in {}s: {}", resource_name, key, backoff_seconds, error);
        } else {
            error!(
                "Reconciliation of {} {} failed ({} error(s) in a row), retrying in {}s: {}",
                resource_name, key, error_count, backoff_seconds, error
            );
        }
        Action::requeue(Duration::from_secs(backoff_seconds))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Context>| {
        debug!("Reconciling {} {}", resource_name, resource_key(obj.as_ref()));
        reconcile_fn(obj, ctx)
    };

    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watch Services, in one namespace or cluster wide
pub async fn watch_services(ctx: Arc<Context>) -> Result<(), ControllerError> {
    let api: Api<Service> = match &ctx.namespace {
        Some(ns) => Api::namespaced(ctx.client.clone(), ns),
        None => Api::all(ctx.client.clone()),
    };
    watch_resource(api, ctx, reconcile_service, "Service").await
}

/// Watch Nodes to keep their placement labels in sync
pub async fn watch_nodes(ctx: Arc<Context>) -> Result<(), ControllerError> {
    let api: Api<Node> = Api::all(ctx.client.clone());
    watch_resource(api, ctx, reconcile_node, "Node").await
}

fn unwrap_finalizer_error(err: kube_runtime::finalizer::Error<ControllerError>) -> ControllerError {
    match err {
        kube_runtime::finalizer::Error::ApplyFailed(e) | kube_runtime::finalizer::Error::CleanupFailed(e) => e,
        other => ControllerError::Finalizer(Box::new(other)),
    }
}

async fn reconcile_service(service: Arc<Service>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let _timer = ctx.metrics.start("service");
    let key = resource_key(service.as_ref());
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &service.namespace().unwrap_or_default());

    let result = if wants_load_balancer(&service) {
        finalizer(&api, LB_FINALIZER, service.clone(), |event| async {
            match event {
                Finalizer::Apply(svc) => apply_service(&svc, &api, &ctx).await,
                Finalizer::Cleanup(svc) => cleanup_service(&svc, &ctx).await,
            }
        })
        .await
        .map_err(unwrap_finalizer_error)
    } else if has_finalizer(&service) {
        // No longer a LoadBalancer Service (or handled by another class)
        release_service(&service, &api, &ctx).await
    } else {
        return Ok(Action::await_change());
    };

    match &result {
        Ok(_) => ctx.reconciler.reset_error(&key),
        Err(e) => ctx.metrics.failure("service", e.reason()),
    }
    result
}

async fn apply_service(service: &Service, api: &Api<Service>, ctx: &Context) -> Result<Action, ControllerError> {
    let result = async {
        let intent = ServiceIntent::from_service(service)?;
        let nodes = Api::<Node>::all(ctx.client.clone())
            .list(&ListParams::default())
            .await?
            .items;
        ctx.reconciler.ensure_load_balancer(&intent, &nodes).await
    }
    .await;

    let object_ref = service.object_ref(&());
    match result {
        Ok(status) => {
            if ingress_changed(service, &status.ingress) {
                let patch = json!({ "status": { "loadBalancer": { "ingress": status.ingress } } });
                api.patch_status(&service.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                info!("Published load balancer ingress of Service {}", resource_key(service));
            }
            if !status.applied.is_empty() {
                ctx.events
                    .publish(
                        &object_ref,
                        EventType::Normal,
                        reasons::ENSURED_LOAD_BALANCER,
                        actions::ENSURE,
                        Some(status.applied.join("; ")),
                    )
                    .await;
            }
            Ok(Action::requeue(SERVICE_RESYNC))
        }
        Err(e) => {
            ctx.events
                .publish(&object_ref, EventType::Warning, e.reason(), actions::ENSURE, Some(e.to_string()))
                .await;
            Err(e)
        }
    }
}

async fn cleanup_service(service: &Service, ctx: &Context) -> Result<Action, ControllerError> {
    let object_ref = service.object_ref(&());
    match ctx.reconciler.ensure_load_balancer_deleted(&resource_key(service)).await {
        Ok(applied) => {
            if !applied.is_empty() {
                ctx.events
                    .publish(
                        &object_ref,
                        EventType::Normal,
                        reasons::DELETED_LOAD_BALANCER,
                        actions::DELETE,
                        Some(applied.join("; ")),
                    )
                    .await;
            }
            Ok(Action::await_change())
        }
        Err(e) => {
            ctx.events
                .publish(&object_ref, EventType::Warning, e.reason(), actions::DELETE, Some(e.to_string()))
                .await;
            Err(e)
        }
    }
}

/// Delete the load balancers of a Service that stopped being a LoadBalancer, then drop the finalizer
async fn release_service(service: &Service, api: &Api<Service>, ctx: &Context) -> Result<Action, ControllerError> {
    cleanup_service(service, ctx).await?;

    let name = service.name_any();
    let status = json!({ "status": { "loadBalancer": { "ingress": null } } });
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&status))
        .await?;

    let remaining: Vec<&String> = service.finalizers().iter().filter(|f| *f != LB_FINALIZER).collect();
    let patch = json!({ "metadata": { "finalizers": remaining } });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    info!("Released load balancer of Service {}", resource_key(service));
    Ok(Action::await_change())
}

async fn reconcile_node(node: Arc<Node>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let _timer = ctx.metrics.start("node");
    let name = node.name_any();

    let changes = match ctx.reconciler.node_label_changes(&node).await {
        Ok(changes) => changes,
        Err(e) => {
            ctx.metrics.failure("node", e.reason());
            return Err(e);
        }
    };
    if let Some(labels) = changes {
        let count = labels.len();
        let api: Api<Node> = Api::all(ctx.client.clone());
        let patch = json!({ "metadata": { "labels": labels } });
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        info!("Updated {} placement label(s) of Node {}", count, name);
    }
    ctx.reconciler.reset_error(&name);
    Ok(Action::requeue(NODE_RESYNC))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use k8s_openapi::api::core::v1::{LoadBalancerStatus, ServiceStatus};

    #[test]
    fn test_wants_load_balancer() {
        let mut svc = create_test_service("web", "default", &[], &[(80, 30080)]);
        assert!(wants_load_balancer(&svc));

        if let Some(spec) = svc.spec.as_mut() {
            spec.load_balancer_class = Some("example.com/other".to_string());
        }
        assert!(!wants_load_balancer(&svc));

        if let Some(spec) = svc.spec.as_mut() {
            spec.load_balancer_class = None;
            spec.type_ = Some("NodePort".to_string());
        }
        assert!(!wants_load_balancer(&svc));
    }

    #[test]
    fn test_finalizer_detection() {
        let mut svc = create_test_service("web", "default", &[], &[(80, 30080)]);
        assert!(!has_finalizer(&svc));
        svc.metadata.finalizers = Some(vec![LB_FINALIZER.to_string()]);
        assert!(has_finalizer(&svc));
    }

    #[test]
    fn test_ingress_changed() {
        let mut svc = create_test_service("web", "default", &[], &[(80, 30080)]);
        let ingress = vec![LoadBalancerIngress {
            hostname: Some("web.eu-west-2.lbu.outscale.com".to_string()),
            ..Default::default()
        }];
        assert!(ingress_changed(&svc, &ingress));
        assert!(!ingress_changed(&svc, &[]));

        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(ingress.clone()),
            }),
            ..Default::default()
        });
        assert!(!ingress_changed(&svc, &ingress));
    }

    #[test]
    fn test_resource_key() {
        let svc = create_test_service("web", "shop", &[], &[(80, 30080)]);
        assert_eq!(resource_key(&svc), "shop/web");
        let node = create_test_node("worker-0", None);
        assert_eq!(resource_key(&node), "worker-0");
    }
}
