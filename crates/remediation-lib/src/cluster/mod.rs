//! Access to the cluster API
//!
//! All commands talk to the cluster through the [`Cluster`] trait. The
//! production implementation wraps a `kube` client; tests use an in-memory
//! fake. This module also holds the pure status rules for deployments and
//! pods that the waits are built on.

mod client;

#[cfg(test)]
pub(crate) mod fake;

pub use client::KubeCluster;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Pod};
use kube::api::DynamicObject;
use serde_json::Value;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::ResourceKind;
use crate::wait::{poll_until, WaitOutcome, WaitPolicy};

pub use async_trait::async_trait;

/// Operations the remediation commands need from the cluster
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Fail with an environment error if the namespace does not exist
    async fn ensure_namespace(&self, namespace: &str) -> Result<()>;

    /// List custom resources of a kind, in one namespace or cluster-wide
    async fn list_resources(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// Apply a JSON merge patch to a custom resource
    async fn merge_patch_resource(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<()>;

    /// Fetch a deployment, `None` if it does not exist
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Apply a strategic merge patch to a deployment
    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &Value) -> Result<()>;

    /// List pods matching a label selector
    async fn list_pods(&self, namespace: Option<&str>, selector: &str) -> Result<Vec<Pod>>;

    /// Fetch a pod, `None` if it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Delete a pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Base URL of the first route matching `selector`, if any
    async fn find_route(&self, namespace: &str, selector: &str) -> Result<Option<String>>;
}

/// Base URL for an OpenShift route object
pub fn route_base_url(route: &DynamicObject) -> Option<String> {
    let spec = route.data.get("spec")?;
    let host = spec.get("host")?.as_str()?.trim();
    if host.is_empty() {
        return None;
    }
    let scheme = match spec.get("tls") {
        Some(Value::Null) | None => "http",
        Some(_) => "https",
    };
    Some(format!("{}://{}", scheme, host))
}

/// Pod phase as reported by the kubelet, empty if unknown
pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("")
}

/// True if the pod has condition `Ready=True`
pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// True if the pod is being deleted
pub fn pod_is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Find a container in the deployment's pod template by name
pub fn find_container<'a>(deployment: &'a Deployment, name: &str) -> Option<&'a Container> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == name)
}

/// Rollout state of a deployment, following `kubectl rollout status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutState {
    Complete,
    InProgress(String),
}

/// Evaluate whether the deployment's latest revision is fully rolled out
pub fn rollout_state(deployment: &Deployment) -> RolloutState {
    let generation = deployment.metadata.generation.unwrap_or(0);
    let status = match deployment.status.as_ref() {
        Some(status) => status,
        None => return RolloutState::InProgress("no status reported yet".to_string()),
    };

    if status.observed_generation.unwrap_or(0) < generation {
        return RolloutState::InProgress("waiting for spec update to be observed".to_string());
    }

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let updated = status.updated_replicas.unwrap_or(0);
    let replicas = status.replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    if updated < desired {
        return RolloutState::InProgress(format!(
            "{} of {} updated replicas are available",
            updated, desired
        ));
    }
    if replicas > updated {
        return RolloutState::InProgress(format!(
            "{} old replicas are pending termination",
            replicas - updated
        ));
    }
    if available < updated {
        return RolloutState::InProgress(format!(
            "{} of {} updated replicas are available",
            available, updated
        ));
    }

    RolloutState::Complete
}

/// Result of waiting on a deployment rollout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutWait {
    Complete,
    DeploymentMissing,
    TimedOut(String),
    Cancelled,
}

/// Poll a deployment until its rollout completes or the policy expires
pub async fn wait_for_rollout<C: Cluster + ?Sized>(
    cluster: &C,
    namespace: &str,
    name: &str,
    policy: WaitPolicy,
    cancel: &CancellationToken,
) -> Result<RolloutWait> {
    let last_state = Mutex::new(String::new());

    let outcome = poll_until(policy, cancel, || {
        let last_state = &last_state;
        async move {
            match cluster.get_deployment(namespace, name).await? {
                None => Ok(Some(RolloutWait::DeploymentMissing)),
                Some(deployment) => match rollout_state(&deployment) {
                    RolloutState::Complete => Ok(Some(RolloutWait::Complete)),
                    RolloutState::InProgress(detail) => {
                        tracing::debug!(namespace, deployment = name, %detail, "Rollout in progress");
                        if let Ok(mut last) = last_state.lock() {
                            *last = detail;
                        }
                        Ok(None)
                    }
                },
            }
        }
    })
    .await?;

    Ok(match outcome {
        WaitOutcome::Ready(state) => state,
        WaitOutcome::TimedOut { elapsed } => RolloutWait::TimedOut(format!(
            "rollout not complete after {}s: {}",
            elapsed.as_secs(),
            last_state.lock().map(|s| s.clone()).unwrap_or_default()
        )),
        WaitOutcome::Cancelled => RolloutWait::Cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

    fn deployment(generation: i64, observed: i64, desired: i32, status: (i32, i32, i32)) -> Deployment {
        let (replicas, updated, available) = status;
        let mut d = Deployment::default();
        d.metadata.generation = Some(generation);
        d.spec = Some(DeploymentSpec {
            replicas: Some(desired),
            ..Default::default()
        });
        d.status = Some(DeploymentStatus {
            observed_generation: Some(observed),
            replicas: Some(replicas),
            updated_replicas: Some(updated),
            available_replicas: Some(available),
            ..Default::default()
        });
        d
    }

    #[test]
    fn test_rollout_complete() {
        assert_eq!(rollout_state(&deployment(2, 2, 1, (1, 1, 1))), RolloutState::Complete);
    }

    #[test]
    fn test_rollout_waits_for_observed_generation() {
        assert!(matches!(
            rollout_state(&deployment(3, 2, 1, (1, 1, 1))),
            RolloutState::InProgress(_)
        ));
    }

    #[test]
    fn test_rollout_waits_for_old_replicas() {
        assert!(matches!(
            rollout_state(&deployment(2, 2, 1, (2, 1, 1))),
            RolloutState::InProgress(_)
        ));
    }

    #[test]
    fn test_rollout_waits_for_availability() {
        assert!(matches!(
            rollout_state(&deployment(2, 2, 1, (1, 1, 0))),
            RolloutState::InProgress(_)
        ));
    }

    #[test]
    fn test_rollout_without_status() {
        let d = Deployment::default();
        assert!(matches!(rollout_state(&d), RolloutState::InProgress(_)));
    }

    #[test]
    fn test_pod_readiness() {
        let mut pod = Pod::default();
        assert!(!pod_is_ready(&pod));

        pod.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert!(pod_is_ready(&pod));
        assert_eq!(pod_phase(&pod), "Running");
    }

    #[test]
    fn test_route_base_url() {
        let ar = ResourceKind::route().api_resource();
        let route = DynamicObject::new("svc", &ar).data(serde_json::json!({
            "spec": { "host": "svc.apps.example.com", "tls": { "termination": "edge" } }
        }));
        assert_eq!(
            route_base_url(&route).as_deref(),
            Some("https://svc.apps.example.com")
        );

        let plain = DynamicObject::new("svc", &ar).data(serde_json::json!({
            "spec": { "host": "svc.apps.example.com" }
        }));
        assert_eq!(
            route_base_url(&plain).as_deref(),
            Some("http://svc.apps.example.com")
        );
    }
}
