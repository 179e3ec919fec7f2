//! Structured logging for remediation runs
//!
//! Every command gets a [`RunLogger`] carrying the command name so that the
//! significant events of a run (patches, rollouts, deadlocks, restores) are
//! emitted with a consistent set of fields.

use tracing::{info, warn};

use crate::summary::BatchSummary;

/// Structured logger for remediation events
#[derive(Debug, Clone)]
pub struct RunLogger {
    command: String,
}

impl RunLogger {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Log the start of a run
    pub fn log_start(&self, mode: &str, namespace: Option<&str>) {
        info!(
            event = "run_started",
            command = %self.command,
            mode = %mode,
            namespace = namespace.unwrap_or("<all>"),
            "Remediation run started"
        );
    }

    /// Log a patch sent to the cluster
    pub fn log_patch_applied(&self, kind: &str, namespace: &str, name: &str) {
        info!(
            event = "patch_applied",
            command = %self.command,
            kind = %kind,
            namespace = %namespace,
            name = %name,
            "Patch applied"
        );
    }

    /// Log the end of a rollout wait
    pub fn log_rollout(&self, namespace: &str, deployment: &str, complete: bool, detail: &str) {
        if complete {
            info!(
                event = "rollout_complete",
                command = %self.command,
                namespace = %namespace,
                deployment = %deployment,
                "Rollout completed"
            );
        } else {
            warn!(
                event = "rollout_incomplete",
                command = %self.command,
                namespace = %namespace,
                deployment = %deployment,
                detail = %detail,
                "Rollout did not complete"
            );
        }
    }

    /// Log a detected Running/Pending contention
    pub fn log_deadlock(&self, namespace: &str, service: &str, running: usize, pending: usize) {
        warn!(
            event = "deadlock_detected",
            command = %self.command,
            namespace = %namespace,
            service = %service,
            running = running,
            pending = pending,
            "Running and Pending pods compete for the same service"
        );
    }

    /// Log the deletion of a pod to release its resources
    pub fn log_pod_deleted(&self, namespace: &str, pod: &str) {
        info!(
            event = "pod_deleted",
            command = %self.command,
            namespace = %namespace,
            pod = %pod,
            "Deleted Running pod to release resources"
        );
    }

    /// Log a best-effort decision taken on ambiguous input
    pub fn log_ambiguity(&self, target: &str, message: &str) {
        warn!(
            event = "ambiguous_input",
            command = %self.command,
            target = %target,
            message = %message,
            "Resolved ambiguous input with default policy"
        );
    }

    /// Log a scheduled metric re-submitted to the service
    pub fn log_metric_restored(
        &self,
        model_id: &str,
        metric_name: &str,
        old_id: &str,
        new_id: Option<&str>,
    ) {
        info!(
            event = "metric_restored",
            command = %self.command,
            model_id = %model_id,
            metric_name = %metric_name,
            old_id = %old_id,
            new_id = new_id.unwrap_or("<unknown>"),
            "Scheduled metric re-submitted"
        );
    }

    /// Log a per-item failure
    pub fn log_item_failed(&self, target: &str, error: &str) {
        warn!(
            event = "item_failed",
            command = %self.command,
            target = %target,
            error = %error,
            "Item failed"
        );
    }

    /// Log the final counters of a run
    pub fn log_summary(&self, summary: &BatchSummary) {
        if summary.has_failures() {
            warn!(
                event = "run_finished",
                command = %self.command,
                succeeded = summary.succeeded,
                action_required = summary.action_required,
                skipped = summary.skipped,
                failed = summary.failed,
                warnings = summary.warnings,
                "Remediation run finished with failures"
            );
        } else {
            info!(
                event = "run_finished",
                command = %self.command,
                succeeded = summary.succeeded,
                action_required = summary.action_required,
                skipped = summary.skipped,
                failed = summary.failed,
                warnings = summary.warnings,
                "Remediation run finished"
            );
        }
    }
}
