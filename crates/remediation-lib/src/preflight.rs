//! Read-only checks run before an upgrade
//!
//! Each resource instance gets an [`InstanceReport`] made of named checks.
//! The instance status is the worst of its checks.

use kube::api::DynamicObject;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::{find_container, Cluster};
use crate::deadlock::{detect_deadlocks, DEFAULT_IDENTITY_LABEL, DEFAULT_POD_SELECTOR};
use crate::error::{RemediationError, Result};
use crate::metrics::{HealthProbe, DEFAULT_ROUTE_SELECTOR};
use crate::models::{ObjectRef, ResourceKind};
use crate::observability::RunLogger;
use crate::probe::{has_liveness_probe, has_readiness_probe, DEFAULT_CONTAINER};
use crate::schema::{classify, exporter_section, parse_path, SchemaState, DEFAULT_EXPORTER_PATH};
use crate::summary::{BatchSummary, ItemOutcome};

/// Check names
pub mod checks {
    pub const DEPLOYMENT: &str = "deployment";
    pub const LIVENESS_PROBE: &str = "liveness-probe";
    pub const READINESS_PROBE: &str = "readiness-probe";
    pub const CONNECTIVITY: &str = "connectivity";
    pub const EXPORTER_SCHEMA: &str = "exporter-schema";
    pub const GPU_DEADLOCK: &str = "gpu-deadlock";
    pub const RESOURCE_TYPE: &str = "resource-type";
}

/// Result of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    pub fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            message: None,
        }
    }

    pub fn warn(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            message: Some(message.into()),
        }
    }

    pub fn fail(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            message: Some(message.into()),
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// All checks for one resource instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceReport {
    pub kind: String,
    pub target: String,
    pub status: CheckStatus,
    pub checks: Vec<CheckResult>,
}

impl InstanceReport {
    pub fn new(kind: impl Into<String>, target: impl Into<String>, checks: Vec<CheckResult>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
            status: Self::compute_status(&checks),
            checks,
        }
    }

    /// Fail dominates Warn, which dominates Pass
    pub fn compute_status(checks: &[CheckResult]) -> CheckStatus {
        checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(CheckStatus::Pass)
    }
}

/// Outcome of a preflight run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub instances: Vec<InstanceReport>,
}

impl PreflightReport {
    pub fn has_failures(&self) -> bool {
        self.instances.iter().any(|i| i.status == CheckStatus::Fail)
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    /// Flatten the report into outcome counts
    pub fn summary(&self) -> BatchSummary {
        self.instances
            .iter()
            .map(|instance| {
                let target = format!("{} {}", instance.kind, instance.target);
                let problems: Vec<String> = instance
                    .checks
                    .iter()
                    .filter(|c| c.status != CheckStatus::Pass)
                    .map(|c| format!("{}: {}", c.name, c.message.as_deref().unwrap_or("")))
                    .collect();
                match instance.status {
                    CheckStatus::Pass => ItemOutcome::succeeded(target, "all checks passed"),
                    CheckStatus::Warn => ItemOutcome::action_required(target, "warnings")
                        .with_warnings(problems),
                    CheckStatus::Fail => ItemOutcome::failed(target, problems.join("; ")),
                }
            })
            .collect()
    }
}

/// Settings for a preflight run
#[derive(Debug, Clone)]
pub struct PreflightOptions {
    pub service_kind: ResourceKind,
    pub orchestrator_kind: ResourceKind,
    pub container: String,
    pub exporter_path: Vec<String>,
    pub pod_selector: String,
    pub identity_label: String,
    pub route_selector: String,
}

impl Default for PreflightOptions {
    fn default() -> Self {
        Self {
            service_kind: ResourceKind::trustyai_service(),
            orchestrator_kind: ResourceKind::guardrails_orchestrator(),
            container: DEFAULT_CONTAINER.to_string(),
            exporter_path: parse_path(DEFAULT_EXPORTER_PATH),
            pod_selector: DEFAULT_POD_SELECTOR.to_string(),
            identity_label: DEFAULT_IDENTITY_LABEL.to_string(),
            route_selector: DEFAULT_ROUTE_SELECTOR.to_string(),
        }
    }
}

/// Runs every preflight check; never changes the cluster
pub struct PreflightChecker<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    health: Option<&'a dyn HealthProbe>,
    options: PreflightOptions,
    logger: RunLogger,
}

impl<'a, C: Cluster + ?Sized> PreflightChecker<'a, C> {
    /// `health` of `None` skips the connectivity check
    pub fn new(
        cluster: &'a C,
        health: Option<&'a dyn HealthProbe>,
        options: PreflightOptions,
    ) -> Self {
        Self {
            cluster,
            health,
            options,
            logger: RunLogger::new("preflight"),
        }
    }

    pub async fn run(&self, namespace: Option<&str>) -> Result<PreflightReport> {
        self.logger.log_start("check", namespace);
        if let Some(ns) = namespace {
            self.cluster.ensure_namespace(ns).await?;
        }

        let mut report = PreflightReport::default();

        match self.list(&self.options.service_kind, namespace).await? {
            Ok(services) => {
                for service in &services {
                    report.instances.push(self.check_service(service).await);
                }
            }
            Err(missing) => report.instances.push(missing),
        }

        match self.list(&self.options.orchestrator_kind, namespace).await? {
            Ok(orchestrators) => {
                for orchestrator in &orchestrators {
                    report.instances.push(self.check_orchestrator(orchestrator));
                }
            }
            Err(missing) => report.instances.push(missing),
        }

        report.instances.push(self.check_deadlocks(namespace).await?);

        for instance in &report.instances {
            info!(
                event = "preflight_instance",
                kind = %instance.kind,
                target = %instance.target,
                status = instance.status.as_str(),
                "Preflight checks evaluated"
            );
        }
        self.logger.log_summary(&report.summary());
        Ok(report)
    }

    /// List instances; a kind that is not installed becomes a warning report
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
    ) -> Result<std::result::Result<Vec<DynamicObject>, InstanceReport>> {
        match self.cluster.list_resources(kind, namespace).await {
            Ok(items) => Ok(Ok(items)),
            Err(RemediationError::ResourceTypeMissing(what)) => Ok(Err(InstanceReport::new(
                kind.kind.clone(),
                "*",
                vec![CheckResult::warn(
                    checks::RESOURCE_TYPE,
                    format!("{} is not installed", what),
                )],
            ))),
            Err(e) => Err(e),
        }
    }

    async fn check_service(&self, service: &DynamicObject) -> InstanceReport {
        let target = ObjectRef::new(service.namespace().unwrap_or_default(), service.name_any());
        let kind = self.options.service_kind.kind.clone();
        let container = self.options.container.as_str();
        let mut results = Vec::new();

        match self
            .cluster
            .get_deployment(&target.namespace, &target.name)
            .await
        {
            Ok(Some(deployment)) => {
                results.push(CheckResult::pass(checks::DEPLOYMENT));
                if find_container(&deployment, container).is_none() {
                    results.push(CheckResult::fail(
                        checks::LIVENESS_PROBE,
                        format!("no container named {}", container),
                    ));
                } else {
                    results.push(if has_liveness_probe(&deployment, container) {
                        CheckResult::pass(checks::LIVENESS_PROBE)
                    } else {
                        CheckResult::fail(checks::LIVENESS_PROBE, "no liveness probe configured")
                    });
                    results.push(if has_readiness_probe(&deployment, container) {
                        CheckResult::pass(checks::READINESS_PROBE)
                    } else {
                        CheckResult::warn(
                            checks::READINESS_PROBE,
                            "no readiness probe; run patch-probes --fix",
                        )
                    });
                }
            }
            Ok(None) => results.push(CheckResult::fail(checks::DEPLOYMENT, "deployment not found")),
            Err(e) => results.push(CheckResult::fail(
                checks::DEPLOYMENT,
                format!("cannot read deployment: {}", e),
            )),
        }

        if let Some(health) = self.health {
            results.push(self.check_connectivity(health, &target.namespace).await);
        }

        InstanceReport::new(kind, target.to_string(), results)
    }

    async fn check_connectivity(&self, health: &dyn HealthProbe, namespace: &str) -> CheckResult {
        let route = match self
            .cluster
            .find_route(namespace, &self.options.route_selector)
            .await
        {
            Ok(Some(url)) => url,
            Ok(None) => {
                return CheckResult::fail(
                    checks::CONNECTIVITY,
                    format!("no route matching {}", self.options.route_selector),
                )
            }
            Err(e) => {
                return CheckResult::fail(checks::CONNECTIVITY, format!("route lookup failed: {}", e))
            }
        };

        debug!(namespace, url = %route, "Checking service health endpoint");
        match health.check(&route).await {
            Ok(status) => CheckResult::pass(checks::CONNECTIVITY)
                .with_message(format!("{} answered {}", route, status)),
            Err(e) => CheckResult::fail(checks::CONNECTIVITY, format!("{}: {}", route, e)),
        }
    }

    fn check_orchestrator(&self, orchestrator: &DynamicObject) -> InstanceReport {
        let target = ObjectRef::new(
            orchestrator.namespace().unwrap_or_default(),
            orchestrator.name_any(),
        );
        let section = exporter_section(&orchestrator.data, &self.options.exporter_path);
        let state = classify(section);
        let check = match &state {
            SchemaState::Current | SchemaState::Unconfigured => {
                CheckResult::pass(checks::EXPORTER_SCHEMA).with_message(state.label())
            }
            SchemaState::Legacy(_) => CheckResult::fail(
                checks::EXPORTER_SCHEMA,
                "legacy exporter fields; run migrate-schema --fix",
            ),
            SchemaState::Unknown { fields } => CheckResult::warn(
                checks::EXPORTER_SCHEMA,
                format!("unrecognised exporter fields: {}", fields.join(", ")),
            ),
        };
        InstanceReport::new(
            self.options.orchestrator_kind.kind.clone(),
            target.to_string(),
            vec![check],
        )
    }

    async fn check_deadlocks(&self, namespace: Option<&str>) -> Result<InstanceReport> {
        let pods = self
            .cluster
            .list_pods(namespace, &self.options.pod_selector)
            .await?;
        let deadlocks = detect_deadlocks(&pods, &self.options.identity_label);

        let check = if deadlocks.is_empty() {
            CheckResult::pass(checks::GPU_DEADLOCK)
        } else {
            let targets: Vec<String> = deadlocks.iter().map(|d| d.target()).collect();
            CheckResult::fail(
                checks::GPU_DEADLOCK,
                format!("Running/Pending contention in {}; run break-deadlock --fix", targets.join(", ")),
            )
        };
        Ok(InstanceReport::new(
            "Namespace",
            namespace.unwrap_or("*"),
            vec![check],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{Container, ExecAction, Probe};
    use serde_json::json;

    struct StaticHealth(bool);

    #[async_trait]
    impl HealthProbe for StaticHealth {
        async fn check(&self, _base_url: &str) -> Result<u16> {
            if self.0 {
                Ok(200)
            } else {
                Err(RemediationError::ServiceApi {
                    status: 503,
                    body: String::new(),
                })
            }
        }
    }

    fn probe() -> Option<Probe> {
        Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec!["true".to_string()]),
            }),
            ..Default::default()
        })
    }

    fn healthy_cluster() -> FakeCluster {
        let fake = FakeCluster::new();
        fake.add_resource(&ResourceKind::trustyai_service(), "models", "trustyai", json!({}));
        fake.add_deployment(
            "models",
            "trustyai",
            Container {
                name: DEFAULT_CONTAINER.to_string(),
                liveness_probe: probe(),
                readiness_probe: probe(),
                ..Default::default()
            },
        );
        fake.add_resource(
            &ResourceKind::guardrails_orchestrator(),
            "models",
            "guardrails",
            json!({ "spec": { "otelExporter": { "otlpProtocol": "grpc" } } }),
        );
        fake.add_route("models", "https://trustyai.apps.example.com");
        fake
    }

    #[test]
    fn test_compute_status_worst_wins() {
        let checks = vec![
            CheckResult::pass("a"),
            CheckResult::warn("b", "meh"),
            CheckResult::pass("c"),
        ];
        assert_eq!(InstanceReport::compute_status(&checks), CheckStatus::Warn);

        let mut failing = checks.clone();
        failing.push(CheckResult::fail("d", "broken"));
        assert_eq!(InstanceReport::compute_status(&failing), CheckStatus::Fail);
        assert_eq!(InstanceReport::compute_status(&[]), CheckStatus::Pass);
    }

    #[tokio::test]
    async fn test_healthy_namespace_passes() {
        let fake = healthy_cluster();
        let health = StaticHealth(true);
        let checker = PreflightChecker::new(&fake, Some(&health), PreflightOptions::default());

        let report = checker.run(Some("models")).await.unwrap();

        assert_eq!(report.instances.len(), 3);
        assert!(report.instances.iter().all(|i| i.status == CheckStatus::Pass));
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_problems_are_reported_per_instance() {
        let fake = healthy_cluster();
        fake.add_resource(
            &ResourceKind::guardrails_orchestrator(),
            "models",
            "old",
            json!({ "spec": { "otelExporter": { "protocol": "http" } } }),
        );
        fake.add_resource(&ResourceKind::trustyai_service(), "models", "no-probes", json!({}));
        fake.add_deployment(
            "models",
            "no-probes",
            Container {
                name: DEFAULT_CONTAINER.to_string(),
                liveness_probe: probe(),
                ..Default::default()
            },
        );
        fake.add_pod("models", "llm-old", "llm", "Running");
        fake.add_pod("models", "llm-new", "llm", "Pending");

        let checker = PreflightChecker::new(&fake, None, PreflightOptions::default());
        let report = checker.run(Some("models")).await.unwrap();

        let status_of = |target: &str| {
            report
                .instances
                .iter()
                .find(|i| i.target == target)
                .map(|i| i.status)
        };
        assert_eq!(status_of("models/no-probes"), Some(CheckStatus::Warn));
        assert_eq!(status_of("models/old"), Some(CheckStatus::Fail));
        assert_eq!(status_of("models"), Some(CheckStatus::Fail));
        assert_eq!(report.exit_code(), 1);

        let no_probes = report
            .instances
            .iter()
            .find(|i| i.target == "models/no-probes")
            .unwrap();
        assert!(no_probes.checks.iter().all(|c| c.name != checks::CONNECTIVITY));
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_connectivity() {
        let fake = healthy_cluster();
        let health = StaticHealth(false);
        let checker = PreflightChecker::new(&fake, Some(&health), PreflightOptions::default());

        let report = checker.run(Some("models")).await.unwrap();
        let service = &report.instances[0];

        assert_eq!(service.status, CheckStatus::Fail);
        assert_eq!(
            service.checks.last().map(|c| c.name.as_str()),
            Some(checks::CONNECTIVITY)
        );
    }

    #[tokio::test]
    async fn test_missing_deployment_fails() {
        let fake = FakeCluster::new();
        fake.add_resource(&ResourceKind::trustyai_service(), "models", "ghost", json!({}));

        let checker = PreflightChecker::new(&fake, None, PreflightOptions::default());
        let report = checker.run(None).await.unwrap();

        assert_eq!(report.instances[0].status, CheckStatus::Fail);
        assert!(report.summary().has_failures());
    }
}
