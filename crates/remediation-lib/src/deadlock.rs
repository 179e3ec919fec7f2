//! GPU contention deadlock detection and resolution
//!
//! During a rollout the new predictor pod can stay Pending because the old
//! Running pod still holds the only GPU on the node. Detection groups pods
//! by their service label; resolution deletes the Running pod and waits for
//! the Pending one to become Ready.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cluster::{pod_is_ready, pod_is_terminating, pod_phase, Cluster};
use crate::error::Result;
use crate::models::Mode;
use crate::observability::RunLogger;
use crate::summary::{BatchSummary, ItemOutcome};
use crate::wait::{poll_until, WaitOutcome, WaitPolicy};

/// Default selector for predictor pods
pub const DEFAULT_POD_SELECTOR: &str = "component=predictor";

/// Default label naming the service a pod belongs to
pub const DEFAULT_IDENTITY_LABEL: &str = "serving.kserve.io/inferenceservice";

/// A service with pods both Running and Pending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadlock {
    pub namespace: String,
    pub service: String,
    pub running: Vec<String>,
    pub pending: Vec<String>,
}

impl Deadlock {
    pub fn target(&self) -> String {
        format!("{}/{}", self.namespace, self.service)
    }
}

/// Group pods by `(namespace, identity label)` and return the groups that
/// hold at least one Running and one Pending pod, sorted by group key.
pub fn detect_deadlocks(pods: &[Pod], identity_label: &str) -> Vec<Deadlock> {
    let mut groups: BTreeMap<(String, String), (Vec<String>, Vec<String>)> = BTreeMap::new();

    for pod in pods {
        if pod_is_terminating(pod) {
            continue;
        }
        let Some(service) = pod.labels().get(identity_label) else {
            continue;
        };
        let key = (pod.namespace().unwrap_or_default(), service.clone());
        let entry = groups.entry(key).or_default();
        match pod_phase(pod) {
            "Running" => entry.0.push(pod.name_any()),
            "Pending" => entry.1.push(pod.name_any()),
            _ => {}
        }
    }

    groups
        .into_iter()
        .filter(|(_, (running, pending))| !running.is_empty() && !pending.is_empty())
        .map(|((namespace, service), (mut running, mut pending))| {
            running.sort();
            pending.sort();
            Deadlock {
                namespace,
                service,
                running,
                pending,
            }
        })
        .collect()
}

/// Settings for a deadlock run
#[derive(Debug, Clone)]
pub struct DeadlockOptions {
    pub selector: String,
    pub identity_label: String,
    pub mode: Mode,
    pub pod_ready: WaitPolicy,
}

impl Default for DeadlockOptions {
    fn default() -> Self {
        Self {
            selector: DEFAULT_POD_SELECTOR.to_string(),
            identity_label: DEFAULT_IDENTITY_LABEL.to_string(),
            mode: Mode::Check,
            pod_ready: WaitPolicy::pod_ready(),
        }
    }
}

/// What became of the Pending pod after the Running one was deleted
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingPod {
    Ready,
    Gone,
}

/// Finds and breaks Running/Pending contention between predictor pods
pub struct DeadlockBreaker<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    options: DeadlockOptions,
    logger: RunLogger,
}

impl<'a, C: Cluster + ?Sized> DeadlockBreaker<'a, C> {
    pub fn new(cluster: &'a C, options: DeadlockOptions) -> Self {
        Self {
            cluster,
            options,
            logger: RunLogger::new("break-deadlock"),
        }
    }

    /// List matching pods and return the current deadlocks
    pub async fn detect(&self, namespace: Option<&str>) -> Result<Vec<Deadlock>> {
        let pods = self
            .cluster
            .list_pods(namespace, &self.options.selector)
            .await?;
        let deadlocks = detect_deadlocks(&pods, &self.options.identity_label);
        for d in &deadlocks {
            self.logger
                .log_deadlock(&d.namespace, &d.service, d.running.len(), d.pending.len());
        }
        Ok(deadlocks)
    }

    /// Detect and, in fix mode, resolve every deadlock
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

        let deadlocks = self.detect(namespace).await?;
        let mut summary = BatchSummary::new();

        for deadlock in &deadlocks {
            if cancel.is_cancelled() {
                summary.record(ItemOutcome::skipped(deadlock.target(), "run cancelled"));
                continue;
            }
            let outcome = match self.options.mode {
                Mode::Check => ItemOutcome::action_required(
                    deadlock.target(),
                    format!(
                        "{} Running, {} Pending",
                        deadlock.running.len(),
                        deadlock.pending.len()
                    ),
                ),
                Mode::DryRun => ItemOutcome::action_required(
                    deadlock.target(),
                    format!("would delete pod {}", deadlock.running[0]),
                )
                .with_detail(serde_json::to_value(deadlock)?),
                Mode::Fix => self.resolve(deadlock, cancel).await,
            };
            summary.record(outcome);
        }

        self.logger.log_summary(&summary);
        Ok(summary)
    }

    async fn resolve(&self, deadlock: &Deadlock, cancel: &CancellationToken) -> ItemOutcome {
        let namespace = deadlock.namespace.as_str();
        let victim = &deadlock.running[0];
        let waiting = &deadlock.pending[0];

        if let Err(e) = self.cluster.delete_pod(namespace, victim).await {
            self.logger.log_item_failed(&deadlock.target(), &e.to_string());
            return ItemOutcome::failed(
                deadlock.target(),
                format!("failed to delete pod {}: {}", victim, e),
            );
        }
        self.logger.log_pod_deleted(namespace, victim);

        let wait = poll_until(self.options.pod_ready, cancel, || async move {
            Ok(match self.cluster.get_pod(namespace, waiting).await? {
                None => Some(PendingPod::Gone),
                Some(pod) if pod_is_ready(&pod) => Some(PendingPod::Ready),
                Some(_) => None,
            })
        })
        .await;

        let deleted = format!("deleted {}", victim);
        match wait {
            Ok(WaitOutcome::Ready(PendingPod::Ready)) => ItemOutcome::succeeded(
                deadlock.target(),
                format!("{}, {} is Ready", deleted, waiting),
            ),
            Ok(WaitOutcome::Ready(PendingPod::Gone)) => {
                ItemOutcome::succeeded(deadlock.target(), deleted)
                    .with_warning(format!("pending pod {} no longer exists", waiting))
            }
            Ok(WaitOutcome::TimedOut { elapsed }) => {
                ItemOutcome::succeeded(deadlock.target(), deleted).with_warning(format!(
                    "pod {} not Ready after {}s",
                    waiting,
                    elapsed.as_secs()
                ))
            }
            Ok(WaitOutcome::Cancelled) => ItemOutcome::succeeded(deadlock.target(), deleted)
                .with_warning(format!("wait for {} cancelled", waiting)),
            Err(e) => ItemOutcome::succeeded(deadlock.target(), deleted)
                .with_warning(format!("could not watch {}: {}", waiting, e)),
        }
    }
}
