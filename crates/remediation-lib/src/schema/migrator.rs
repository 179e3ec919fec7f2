//! Batch migration of orchestrator resources

use kube::api::DynamicObject;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;

use super::{build_patch, classify, exporter_section, migrate, SchemaState};
use crate::cluster::{wait_for_rollout, Cluster, RolloutWait};
use crate::error::Result;
use crate::models::{Mode, ObjectRef, ResourceKind};
use crate::observability::RunLogger;
use crate::summary::{BatchSummary, ItemOutcome, OutcomeStatus};
use crate::wait::WaitPolicy;

/// Settings for a migration run
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub kind: ResourceKind,
    pub exporter_path: Vec<String>,
    pub mode: Mode,
    pub rollout: WaitPolicy,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            kind: ResourceKind::guardrails_orchestrator(),
            exporter_path: super::parse_path(super::DEFAULT_EXPORTER_PATH),
            mode: Mode::Check,
            rollout: WaitPolicy::rollout(),
        }
    }
}

/// Classifies every resource of a kind and migrates the legacy ones
pub struct SchemaMigrator<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    options: MigrationOptions,
    logger: RunLogger,
}

impl<'a, C: Cluster + ?Sized> SchemaMigrator<'a, C> {
    pub fn new(cluster: &'a C, options: MigrationOptions) -> Self {
        Self {
            cluster,
            options,
            logger: RunLogger::new("migrate-schema"),
        }
    }

    /// Process all resources in `namespace` (or cluster-wide).
    ///
    /// Listing failures are returned as errors; everything that goes wrong
    /// for a single resource is recorded in the summary instead.
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
        let resources = self
            .cluster
            .list_resources(&self.options.kind, namespace)
            .await?;

        let mut summary = BatchSummary::new();
        for resource in &resources {
            if cancel.is_cancelled() {
                summary.record(ItemOutcome::skipped(
                    object_ref(resource).to_string(),
                    "run cancelled",
                ));
                continue;
            }
            let outcome = self.process(resource, cancel).await;
            if outcome.status == OutcomeStatus::Failed {
                self.logger
                    .log_item_failed(&outcome.target, &outcome.message);
            }
            summary.record(outcome);
        }

        self.logger.log_summary(&summary);
        Ok(summary)
    }

    async fn process(&self, resource: &DynamicObject, cancel: &CancellationToken) -> ItemOutcome {
        let target = object_ref(resource);
        let section = exporter_section(&resource.data, &self.options.exporter_path);

        let legacy = match classify(section) {
            SchemaState::Unconfigured => {
                return ItemOutcome::skipped(target.to_string(), "no exporter configured")
            }
            SchemaState::Current => {
                return ItemOutcome::skipped(target.to_string(), "already migrated")
            }
            SchemaState::Unknown { fields } => {
                let warning = format!(
                    "exporter section matches neither schema (unrecognised: {})",
                    fields.join(", ")
                );
                self.logger.log_ambiguity(&target.to_string(), &warning);
                return ItemOutcome::skipped(target.to_string(), "unknown exporter schema")
                    .with_warning(warning);
            }
            SchemaState::Legacy(legacy) => legacy,
        };

        let migration = migrate(&legacy);
        for warning in &migration.warnings {
            self.logger.log_ambiguity(&target.to_string(), warning);
        }

        if migration.target.is_empty() {
            return ItemOutcome::skipped(target.to_string(), "legacy schema but nothing to map")
                .with_warnings(migration.warnings)
                .with_warning("no current field could be inferred; patch not applied");
        }

        let empty = serde_json::Value::Null;
        let patch = build_patch(
            &self.options.exporter_path,
            &migration.target,
            section.unwrap_or(&empty),
        );

        match self.options.mode {
            Mode::Check => {
                ItemOutcome::action_required(target.to_string(), "legacy schema, needs migration")
                    .with_warnings(migration.warnings)
            }
            Mode::DryRun => ItemOutcome::action_required(
                target.to_string(),
                "legacy schema, patch would be applied",
            )
            .with_warnings(migration.warnings)
            .with_detail(patch),
            Mode::Fix => self.apply(&target, &patch, migration.warnings, cancel).await,
        }
    }

    async fn apply(
        &self,
        target: &ObjectRef,
        patch: &serde_json::Value,
        warnings: Vec<String>,
        cancel: &CancellationToken,
    ) -> ItemOutcome {
        if let Err(e) = self
            .cluster
            .merge_patch_resource(&self.options.kind, &target.namespace, &target.name, patch)
            .await
        {
            return ItemOutcome::failed(target.to_string(), format!("patch failed: {}", e))
                .with_warnings(warnings);
        }
        self.logger
            .log_patch_applied(&self.options.kind.kind, &target.namespace, &target.name);

        let wait = wait_for_rollout(
            self.cluster,
            &target.namespace,
            &target.name,
            self.options.rollout,
            cancel,
        )
        .await;

        match wait {
            Ok(RolloutWait::Complete) => {
                self.logger
                    .log_rollout(&target.namespace, &target.name, true, "");
                ItemOutcome::succeeded(target.to_string(), "migrated, rollout complete")
                    .with_warnings(warnings)
            }
            Ok(RolloutWait::DeploymentMissing) => {
                ItemOutcome::succeeded(target.to_string(), "migrated")
                    .with_warnings(warnings)
                    .with_warning("no deployment with the resource's name to wait for")
            }
            Ok(RolloutWait::TimedOut(detail)) => {
                self.logger
                    .log_rollout(&target.namespace, &target.name, false, &detail);
                ItemOutcome::failed(target.to_string(), format!("migrated, but {}", detail))
                    .with_warnings(warnings)
            }
            Ok(RolloutWait::Cancelled) => ItemOutcome::failed(
                target.to_string(),
                "migrated, rollout wait cancelled",
            )
            .with_warnings(warnings),
            Err(e) => ItemOutcome::failed(
                target.to_string(),
                format!("migrated, rollout wait failed: {}", e),
            )
            .with_warnings(warnings),
        }
    }
}

fn object_ref(resource: &DynamicObject) -> ObjectRef {
    ObjectRef::new(
        resource.namespace().unwrap_or_default(),
        resource.name_any(),
    )
}
