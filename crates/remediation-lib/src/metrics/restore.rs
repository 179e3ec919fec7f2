//! Resubmitting backed-up metric requests

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{BackupDocument, MetricKind, MetricsApi, ScheduledMetricRequest};
use crate::error::{RemediationError, Result};
use crate::observability::RunLogger;
use crate::summary::{BatchSummary, ItemOutcome};

/// Settings for a restore run
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Skip records whose `(modelId, metricName)` is already scheduled
    pub skip_existing: bool,
    /// Report what would be submitted without calling the service
    pub dry_run: bool,
}

impl RestoreOptions {
    /// Whether the run talks to the service at all
    pub fn needs_service(&self) -> bool {
        !self.dry_run || self.skip_existing
    }
}

/// Read and validate a backup file
pub async fn read_backup(path: &Path) -> Result<BackupDocument> {
    let invalid = |reason: String| RemediationError::InvalidBackup {
        path: path.display().to_string(),
        reason,
    };
    let body = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| invalid(e.to_string()))
}

/// Submits each backed-up request to the scheduling endpoint for its kind.
///
/// The service may be omitted when [`RestoreOptions::needs_service`] is
/// false.
pub struct MetricsRestorer<'a, A: MetricsApi + ?Sized> {
    api: Option<&'a A>,
    options: RestoreOptions,
    logger: RunLogger,
}

impl<'a, A: MetricsApi + ?Sized> MetricsRestorer<'a, A> {
    pub fn new(api: Option<&'a A>, options: RestoreOptions) -> Self {
        Self {
            api,
            options,
            logger: RunLogger::new("metrics-restore"),
        }
    }

    /// Restore every record. Only a failure to read the current listing
    /// aborts; everything else is recorded per record.
    pub async fn run(
        &self,
        document: &BackupDocument,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let mode = if self.options.dry_run { "dry-run" } else { "fix" };
        self.logger.log_start(mode, None);

        if self.api.is_none() && self.options.needs_service() {
            return Err(RemediationError::Configuration(
                "restore needs the service endpoint unless it is a dry run".to_string(),
            ));
        }

        let existing: HashSet<(String, String)> = match self.api {
            Some(api) if self.options.skip_existing => api
                .list(None)
                .await?
                .requests
                .iter()
                .map(ScheduledMetricRequest::key)
                .collect(),
            _ => HashSet::new(),
        };

        let mut summary = BatchSummary::new();
        for record in &document.requests {
            let target = format!(
                "{}/{}",
                record.request.model_id(),
                record.request.metric_name()
            );
            if cancel.is_cancelled() {
                summary.record(ItemOutcome::skipped(target, "run cancelled"));
                continue;
            }
            let outcome = self.restore_one(record, &target, &existing).await;
            summary.record(outcome);
        }

        self.logger.log_summary(&summary);
        Ok(summary)
    }

    async fn restore_one(
        &self,
        record: &ScheduledMetricRequest,
        target: &str,
        existing: &HashSet<(String, String)>,
    ) -> ItemOutcome {
        let Some(kind) = MetricKind::from_name(record.request.metric_name()) else {
            let message = format!("unknown metric name {}", record.request.metric_name());
            self.logger.log_item_failed(target, &message);
            return ItemOutcome::failed(target, message);
        };

        if existing.contains(&record.key()) {
            return ItemOutcome::skipped(target, "already scheduled");
        }

        if self.options.dry_run {
            let detail = Value::Object(record.request.as_map().clone());
            return ItemOutcome::action_required(
                target,
                format!("would submit to {}", kind.endpoint()),
            )
            .with_detail(detail);
        }

        let Some(api) = self.api else {
            return ItemOutcome::failed(target, "no service endpoint");
        };
        match api.schedule(kind, &record.request).await {
            Ok(new_id) => {
                self.logger.log_metric_restored(
                    record.request.model_id(),
                    record.request.metric_name(),
                    &record.id,
                    new_id.as_deref(),
                );
                let message = match new_id {
                    Some(id) => format!("restored as {}", id),
                    None => "restored".to_string(),
                };
                ItemOutcome::succeeded(target, message)
            }
            Err(e) => {
                self.logger.log_item_failed(target, &e.to_string());
                ItemOutcome::failed(target, format!("submit failed: {}", e))
            }
        }
    }
}
