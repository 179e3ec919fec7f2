//! Readiness probe patching of service deployments

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::cluster::{find_container, wait_for_rollout, Cluster, RolloutWait};
use crate::error::Result;
use crate::models::{Mode, ObjectRef, ResourceKind};
use crate::observability::RunLogger;
use crate::summary::{BatchSummary, ItemOutcome, OutcomeStatus};
use crate::wait::WaitPolicy;

/// Container serving the REST API in each service deployment
pub const DEFAULT_CONTAINER: &str = "trustyai-service";

/// HTTP readiness probe added to the serving container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessProbe {
    pub path: String,
    pub port: i32,
    pub initial_delay_seconds: i32,
    pub period_seconds: i32,
    pub timeout_seconds: i32,
    pub failure_threshold: i32,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            path: "/q/health/ready".to_string(),
            port: 8080,
            initial_delay_seconds: 10,
            period_seconds: 10,
            timeout_seconds: 5,
            failure_threshold: 3,
        }
    }
}

impl ReadinessProbe {
    /// Strategic merge patch adding this probe to `container`
    pub fn patch_for(&self, container: &str) -> Value {
        json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{
                            "name": container,
                            "readinessProbe": {
                                "exec": null,
                                "tcpSocket": null,
                                "grpc": null,
                                "httpGet": {
                                    "path": self.path,
                                    "port": self.port,
                                    "scheme": "HTTP"
                                },
                                "initialDelaySeconds": self.initial_delay_seconds,
                                "periodSeconds": self.period_seconds,
                                "timeoutSeconds": self.timeout_seconds,
                                "failureThreshold": self.failure_threshold
                            }
                        }]
                    }
                }
            }
        })
    }
}

/// Settings for a probe patching run
#[derive(Debug, Clone)]
pub struct ProbePatchOptions {
    pub kind: ResourceKind,
    pub container: String,
    pub probe: ReadinessProbe,
    pub mode: Mode,
    pub rollout: WaitPolicy,
}

impl Default for ProbePatchOptions {
    fn default() -> Self {
        Self {
            kind: ResourceKind::trustyai_service(),
            container: DEFAULT_CONTAINER.to_string(),
            probe: ReadinessProbe::default(),
            mode: Mode::Check,
            rollout: WaitPolicy::rollout(),
        }
    }
}

/// True if the named container in the deployment has a readiness probe
pub fn has_readiness_probe(deployment: &Deployment, container: &str) -> bool {
    find_container(deployment, container)
        .map(|c| c.readiness_probe.is_some())
        .unwrap_or(false)
}

/// True if the named container in the deployment has a liveness probe
pub fn has_liveness_probe(deployment: &Deployment, container: &str) -> bool {
    find_container(deployment, container)
        .map(|c| c.liveness_probe.is_some())
        .unwrap_or(false)
}

/// Adds the readiness probe to the deployment behind every service instance
pub struct ProbePatcher<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    options: ProbePatchOptions,
    logger: RunLogger,
}

impl<'a, C: Cluster + ?Sized> ProbePatcher<'a, C> {
    pub fn new(cluster: &'a C, options: ProbePatchOptions) -> Self {
        Self {
            cluster,
            options,
            logger: RunLogger::new("patch-probes"),
        }
    }

    pub async fn run(
        &self,
        namespace: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        self.logger
            .log_start(&self.options.mode.to_string(), namespace);
        if let Some(ns) = namespace {
            self.cluster.ensure_namespace(ns).await?;
        }

        let instances = self
            .cluster
            .list_resources(&self.options.kind, namespace)
            .await?;

        let mut summary = BatchSummary::new();
        for instance in &instances {
            let target = ObjectRef::new(instance.namespace().unwrap_or_default(), instance.name_any());
            if cancel.is_cancelled() {
                summary.record(ItemOutcome::skipped(target.to_string(), "run cancelled"));
                continue;
            }
            let outcome = self.process(&target, cancel).await;
            if outcome.status == OutcomeStatus::Failed {
                self.logger.log_item_failed(&outcome.target, &outcome.message);
            }
            summary.record(outcome);
        }

        self.logger.log_summary(&summary);
        Ok(summary)
    }

    async fn process(&self, target: &ObjectRef, cancel: &CancellationToken) -> ItemOutcome {
        let deployment = match self
            .cluster
            .get_deployment(&target.namespace, &target.name)
            .await
        {
            Ok(Some(deployment)) => deployment,
            Ok(None) => return ItemOutcome::failed(target.to_string(), "deployment not found"),
            Err(e) => {
                return ItemOutcome::failed(
                    target.to_string(),
                    format!("cannot read deployment: {}", e),
                )
            }
        };

        let container = self.options.container.as_str();
        if find_container(&deployment, container).is_none() {
            return ItemOutcome::failed(
                target.to_string(),
                format!("deployment has no container named {}", container),
            );
        }

        let present = has_readiness_probe(&deployment, container);
        let patch = self.options.probe.patch_for(container);

        match self.options.mode {
            Mode::Check if present => {
                ItemOutcome::succeeded(target.to_string(), "readiness probe present")
            }
            Mode::Check => ItemOutcome::action_required(target.to_string(), "readiness probe missing"),
            Mode::DryRun => {
                let message = if present {
                    "readiness probe present, patch would replace it"
                } else {
                    "readiness probe missing, patch would add it"
                };
                ItemOutcome::action_required(target.to_string(), message).with_detail(patch)
            }
            Mode::Fix => self.apply(target, &patch, cancel).await,
        }
    }

    async fn apply(&self, target: &ObjectRef, patch: &Value, cancel: &CancellationToken) -> ItemOutcome {
        if let Err(e) = self
            .cluster
            .patch_deployment(&target.namespace, &target.name, patch)
            .await
        {
            return ItemOutcome::failed(target.to_string(), format!("patch rejected: {}", e));
        }
        self.logger
            .log_patch_applied("Deployment", &target.namespace, &target.name);

        match wait_for_rollout(
            self.cluster,
            &target.namespace,
            &target.name,
            self.options.rollout,
            cancel,
        )
        .await
        {
            Ok(RolloutWait::Complete) => {
                self.logger.log_rollout(&target.namespace, &target.name, true, "");
                ItemOutcome::succeeded(target.to_string(), "probe added, rollout complete")
            }
            Ok(RolloutWait::DeploymentMissing) => ItemOutcome::failed(
                target.to_string(),
                "deployment disappeared during rollout",
            ),
            Ok(RolloutWait::TimedOut(detail)) => {
                self.logger
                    .log_rollout(&target.namespace, &target.name, false, &detail);
                ItemOutcome::failed(target.to_string(), detail)
            }
            Ok(RolloutWait::Cancelled) => {
                ItemOutcome::failed(target.to_string(), "rollout wait cancelled")
            }
            Err(e) => ItemOutcome::failed(target.to_string(), format!("rollout wait failed: {}", e)),
        }
    }
}
