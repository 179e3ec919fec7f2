//! In-memory [`Cluster`] used by the batch tests

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::{
    Container, Pod, PodCondition, PodSpec, PodStatus, PodTemplateSpec,
};
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;

use super::{async_trait, Cluster};
use crate::error::{RemediationError, Result};
use crate::models::ResourceKind;

#[derive(Default)]
struct State {
    namespaces: HashSet<String>,
    resources: Vec<(String, DynamicObject)>,
    deployments: BTreeMap<(String, String), Deployment>,
    pods: Vec<Pod>,
    routes: BTreeMap<String, String>,
    failing_patches: HashSet<String>,
    failing_deletes: HashSet<String>,
    held_pending: HashSet<String>,
    vanishing: HashSet<String>,
    stalled: HashSet<String>,
    calls: Vec<String>,
}

/// Cluster double holding resources, deployments and pods in memory.
///
/// Merge patches are applied with RFC 7386 semantics. Deleting a Running pod
/// promotes the Pending pods of the same service to Running and Ready, the
/// way the scheduler would once the GPU is released.
pub struct FakeCluster {
    identity_label: String,
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            identity_label: "serving.kserve.io/inferenceservice".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster state poisoned")
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.state().namespaces.insert(namespace.to_string());
    }

    pub fn add_resource(&self, kind: &ResourceKind, namespace: &str, name: &str, data: Value) {
        self.add_namespace(namespace);
        let obj = DynamicObject::new(name, &kind.api_resource())
            .within(namespace)
            .data(data);
        self.state().resources.push((kind.plural.clone(), obj));
    }

    pub fn resource(&self, kind: &ResourceKind, namespace: &str, name: &str) -> Option<Value> {
        self.state()
            .resources
            .iter()
            .find(|(plural, obj)| {
                plural == &kind.plural
                    && obj.namespace().as_deref() == Some(namespace)
                    && obj.name_any() == name
            })
            .map(|(_, obj)| obj.data.clone())
    }

    /// Add a fully rolled-out deployment with one container
    pub fn add_deployment(&self, namespace: &str, name: &str, container: Container) {
        self.add_namespace(namespace);
        let mut deployment = Deployment::default();
        deployment.metadata.name = Some(name.to_string());
        deployment.metadata.namespace = Some(namespace.to_string());
        deployment.metadata.generation = Some(1);
        deployment.spec = Some(DeploymentSpec {
            replicas: Some(1),
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        });
        deployment.status = Some(complete_status(1));
        self.state()
            .deployments
            .insert((namespace.to_string(), name.to_string()), deployment);
    }

    /// Leave a deployment permanently mid-rollout
    pub fn stall_rollout(&self, namespace: &str, name: &str) {
        let mut state = self.state();
        state.stalled.insert(format!("{}/{}", namespace, name));
        if let Some(d) = state
            .deployments
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            d.metadata.generation = Some(d.metadata.generation.unwrap_or(1) + 1);
        }
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn add_pod(&self, namespace: &str, name: &str, service: &str, phase: &str) {
        self.add_namespace(namespace);
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.labels = Some(BTreeMap::from([
            ("component".to_string(), "predictor".to_string()),
            (self.identity_label.clone(), service.to_string()),
        ]));
        pod.status = Some(pod_status(phase, phase == "Running"));
        self.state().pods.push(pod);
    }

    pub fn add_route(&self, namespace: &str, base_url: &str) {
        self.state()
            .routes
            .insert(namespace.to_string(), base_url.to_string());
    }

    /// Make every patch against `namespace/name` fail
    pub fn fail_patches_for(&self, namespace: &str, name: &str) {
        self.state()
            .failing_patches
            .insert(format!("{}/{}", namespace, name));
    }

    /// Refuse deletion of the named pod
    pub fn fail_deletes_for(&self, namespace: &str, pod: &str) {
        self.state()
            .failing_deletes
            .insert(format!("{}/{}", namespace, pod));
    }

    /// Keep the named pod Pending when its service frees a GPU
    pub fn hold_pending(&self, namespace: &str, pod: &str) {
        self.state()
            .held_pending
            .insert(format!("{}/{}", namespace, pod));
    }

    /// Remove the named pod instead of promoting it when its service frees a GPU
    pub fn vanish_pending(&self, namespace: &str, pod: &str) {
        self.state()
            .vanishing
            .insert(format!("{}/{}", namespace, pod));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.state().pods.iter().map(|p| p.name_any()).collect()
    }

    fn rejected(&self, namespace: &str, name: &str) -> Option<RemediationError> {
        let key = format!("{}/{}", namespace, name);
        if self.state().failing_patches.contains(&key) {
            Some(invalid(format!("admission webhook denied the patch for {}", key)))
        } else {
            None
        }
    }
}

fn invalid(message: String) -> RemediationError {
    RemediationError::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: "Invalid".to_string(),
        code: 422,
    }))
}

const PROBE_HANDLERS: [&str; 4] = ["exec", "httpGet", "tcpSocket", "grpc"];

/// Pod template validation: a probe may name only one handler type
fn validate_probes(containers: &[Value]) -> Result<()> {
    for container in containers {
        for probe in ["readinessProbe", "livenessProbe", "startupProbe"] {
            let Some(probe_spec) = container.get(probe) else {
                continue;
            };
            let handlers = PROBE_HANDLERS
                .iter()
                .filter(|h| probe_spec.get(**h).is_some_and(|v| !v.is_null()))
                .count();
            if handlers > 1 {
                return Err(invalid(format!(
                    "{}: may not specify more than 1 handler type",
                    probe
                )));
            }
        }
    }
    Ok(())
}

fn complete_status(replicas: i32) -> DeploymentStatus {
    DeploymentStatus {
        observed_generation: Some(1),
        replicas: Some(replicas),
        updated_replicas: Some(replicas),
        available_replicas: Some(replicas),
        ready_replicas: Some(replicas),
        ..Default::default()
    }
}

fn pod_status(phase: &str, ready: bool) -> PodStatus {
    PodStatus {
        phase: Some(phase.to_string()),
        conditions: Some(vec![PodCondition {
            type_: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// RFC 7386 JSON merge patch
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            if let Value::Object(target_map) = target {
                for (key, value) in patch_map {
                    if value.is_null() {
                        target_map.remove(key);
                    } else {
                        apply_merge_patch(
                            target_map.entry(key.clone()).or_insert(Value::Null),
                            value,
                        );
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

fn labels_match(pod: &Pod, selector: &str) -> bool {
    let labels = pod.labels();
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        if self.state().namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(RemediationError::NamespaceNotFound(namespace.to_string()))
        }
    }

    async fn list_resources(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let mut state = self.state();
        state.calls.push(format!("list {}", kind.plural));
        Ok(state
            .resources
            .iter()
            .filter(|(plural, obj)| {
                plural == &kind.plural
                    && namespace.map_or(true, |ns| obj.namespace().as_deref() == Some(ns))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn merge_patch_resource(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<()> {
        if let Some(err) = self.rejected(namespace, name) {
            return Err(err);
        }
        let mut state = self.state();
        state
            .calls
            .push(format!("patch {} {}/{}", kind.plural, namespace, name));
        let obj = state
            .resources
            .iter_mut()
            .find(|(plural, obj)| {
                plural == &kind.plural
                    && obj.namespace().as_deref() == Some(namespace)
                    && obj.name_any() == name
            })
            .map(|(_, obj)| obj)
            .ok_or_else(|| RemediationError::ResourceNotFound {
                kind: kind.kind.clone(),
                name: name.to_string(),
            })?;
        apply_merge_patch(&mut obj.data, patch);
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(self.deployment(namespace, name))
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        if let Some(err) = self.rejected(namespace, name) {
            return Err(err);
        }
        let mut state = self.state();
        state
            .calls
            .push(format!("patch deployment {}/{}", namespace, name));
        let stalled = state.stalled.contains(&format!("{}/{}", namespace, name));
        let deployment = state
            .deployments
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| RemediationError::ResourceNotFound {
                kind: "Deployment".to_string(),
                name: name.to_string(),
            })?;

        // Strategic merge on containers: merge list entries by name
        let mut current = serde_json::to_value(&*deployment)?;
        if let Some(patch_containers) = patch
            .pointer("/spec/template/spec/containers")
            .and_then(Value::as_array)
        {
            if let Some(containers) = current
                .pointer_mut("/spec/template/spec/containers")
                .and_then(Value::as_array_mut)
            {
                for patch_container in patch_containers {
                    let name = patch_container.get("name").cloned();
                    match containers.iter_mut().find(|c| c.get("name") == name.as_ref()) {
                        Some(existing) => apply_merge_patch(existing, patch_container),
                        None => containers.push(patch_container.clone()),
                    }
                }
                validate_probes(containers)?;
            }
        }
        let mut updated: Deployment = serde_json::from_value(current)?;
        updated.metadata.generation = Some(updated.metadata.generation.unwrap_or(0) + 1);
        if !stalled {
            let generation = updated.metadata.generation;
            if let Some(status) = updated.status.as_mut() {
                status.observed_generation = generation;
            }
        }
        *deployment = updated;
        Ok(())
    }

    async fn list_pods(&self, namespace: Option<&str>, selector: &str) -> Result<Vec<Pod>> {
        Ok(self
            .state()
            .pods
            .iter()
            .filter(|p| namespace.map_or(true, |ns| p.namespace().as_deref() == Some(ns)))
            .filter(|p| labels_match(p, selector))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self
            .state()
            .pods
            .iter()
            .find(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
            .cloned())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("delete pod {}/{}", namespace, name));
        let key = format!("{}/{}", namespace, name);
        if state.failing_deletes.contains(&key) {
            return Err(RemediationError::Kube(kube::Error::Api(
                kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: format!("pods \"{}\" is forbidden", name),
                    reason: "Forbidden".to_string(),
                    code: 403,
                },
            )));
        }

        let position = state
            .pods
            .iter()
            .position(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name);
        let Some(position) = position else {
            return Ok(());
        };
        let removed = state.pods.remove(position);
        let service = removed.labels().get(&self.identity_label).cloned();

        let State {
            pods,
            held_pending,
            vanishing,
            ..
        } = &mut *state;
        let sibling = |pod: &Pod| {
            pod.namespace().as_deref() == Some(namespace)
                && pod.labels().get(&self.identity_label).cloned() == service
                && pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Pending")
        };
        let key_of = |pod: &Pod| format!("{}/{}", namespace, pod.name_any());

        pods.retain(|pod| !(sibling(pod) && vanishing.contains(&key_of(pod))));
        for pod in pods.iter_mut() {
            if sibling(&*pod) && !held_pending.contains(&key_of(&*pod)) {
                pod.status = Some(pod_status("Running", true));
            }
        }
        Ok(())
    }

    async fn find_route(&self, namespace: &str, _selector: &str) -> Result<Option<String>> {
        Ok(self.state().routes.get(namespace).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_patch_removes_nulls_and_merges_objects() {
        let mut target = json!({"spec": {"a": 1, "b": {"c": 2}}});
        apply_merge_patch(&mut target, &json!({"spec": {"a": null, "b": {"d": 3}}}));
        assert_eq!(target, json!({"spec": {"b": {"c": 2, "d": 3}}}));
    }

    #[test]
    fn test_label_selector_matching() {
        let fake = FakeCluster::new();
        fake.add_pod("ns", "p", "svc", "Running");
        let pod = fake.state().pods[0].clone();
        assert!(labels_match(&pod, "component=predictor"));
        assert!(labels_match(&pod, "component=predictor,serving.kserve.io/inferenceservice=svc"));
        assert!(!labels_match(&pod, "component=transformer"));
    }
}
