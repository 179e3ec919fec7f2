//! Per-item outcomes and the batch summary accumulated from them

use serde::{Deserialize, Serialize};

/// Final state of one processed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Change applied or check passed
    Succeeded,
    /// Item needs remediation (check and dry-run modes)
    ActionRequired,
    /// Nothing to do, or deliberately left alone
    Skipped,
    /// Operation failed for this item
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::ActionRequired => "action_required",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Failed => "failed",
        }
    }
}

/// Result of processing a single resource, pod group or metric record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub target: String,
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Extra payload, e.g. the patch a dry run would apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ItemOutcome {
    fn new(target: impl Into<String>, status: OutcomeStatus, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status,
            message: message.into(),
            warnings: Vec::new(),
            detail: None,
        }
    }

    pub fn succeeded(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(target, OutcomeStatus::Succeeded, message)
    }

    pub fn action_required(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(target, OutcomeStatus::ActionRequired, message)
    }

    pub fn skipped(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(target, OutcomeStatus::Skipped, message)
    }

    pub fn failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(target, OutcomeStatus::Failed, message)
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Totals and item list returned by every batch operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub action_required: usize,
    pub skipped: usize,
    pub failed: usize,
    pub warnings: usize,
    pub items: Vec<ItemOutcome>,
}

impl BatchSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one item and bump the matching counter
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome.status {
            OutcomeStatus::Succeeded => self.succeeded += 1,
            OutcomeStatus::ActionRequired => self.action_required += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
            OutcomeStatus::Failed => self.failed += 1,
        }
        self.warnings += outcome.warnings.len();
        self.items.push(outcome);
    }

    /// Fold another summary into this one
    pub fn merge(&mut self, other: BatchSummary) {
        self.succeeded += other.succeeded;
        self.action_required += other.action_required;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.warnings += other.warnings;
        self.items.extend(other.items);
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Process exit code for this summary
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }
}

impl FromIterator<ItemOutcome> for BatchSummary {
    fn from_iter<I: IntoIterator<Item = ItemOutcome>>(iter: I) -> Self {
        let mut summary = BatchSummary::new();
        for outcome in iter {
            summary.record(outcome);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_by_status() {
        let mut summary = BatchSummary::new();
        summary.record(ItemOutcome::succeeded("a", "ok"));
        summary.record(ItemOutcome::skipped("b", "nothing to do").with_warning("odd"));
        summary.record(ItemOutcome::failed("c", "boom"));
        summary.record(ItemOutcome::action_required("d", "needs fix"));

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.action_required, 1);
        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn test_merge_adds_counters_and_items() {
        let mut left: BatchSummary = vec![ItemOutcome::succeeded("a", "ok")].into_iter().collect();
        let right: BatchSummary = vec![
            ItemOutcome::succeeded("b", "ok"),
            ItemOutcome::skipped("c", "skip"),
        ]
        .into_iter()
        .collect();

        left.merge(right);

        assert_eq!(left.succeeded, 2);
        assert_eq!(left.skipped, 1);
        assert_eq!(left.total(), 3);
        assert!(!left.has_failures());
        assert_eq!(left.exit_code(), 0);
    }

    #[test]
    fn test_action_required_is_not_a_failure() {
        let summary: BatchSummary = vec![ItemOutcome::action_required("a", "legacy schema")]
            .into_iter()
            .collect();
        assert_eq!(summary.exit_code(), 0);
    }
}
