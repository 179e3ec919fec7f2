//! Scheduled metric backup and restore
//!
//! The service exposes its scheduled fairness and drift metrics over REST.
//! A backup is the raw listing body written to disk; a restore resubmits
//! each request payload to the scheduling endpoint for its metric kind.

mod backup;
mod client;
mod restore;


pub use backup::{write_backup, BackupOptions, BackupResult, LATEST_FILE};
pub use client::{HealthProbe, HttpHealthProbe, MetricsApi, TrustyAiClient};
pub use restore::{read_backup, MetricsRestorer, RestoreOptions};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RemediationError;

/// Path of the listing endpoint
pub const LIST_PATH: &str = "/metrics/all/requests";

/// Path of the readiness endpoint
pub const HEALTH_PATH: &str = "/q/health/ready";

/// Default label selector for the service route
pub const DEFAULT_ROUTE_SELECTOR: &str = "app=trustyai-service";

/// Body submitted to a scheduling endpoint.
///
/// Held as the raw JSON object from the listing and posted back untouched.
/// Only `modelId` and `metricName` are read, and both must be non-empty
/// strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct MetricRequestPayload {
    fields: Map<String, Value>,
    model_id: String,
    metric_name: String,
}

impl MetricRequestPayload {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Raw field by its wire name
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }
}

fn required_str(fields: &Map<String, Value>, key: &str) -> Result<String, String> {
    match fields.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(format!("field `{}` is empty", key)),
        Some(other) => Err(format!("field `{}` must be a string, got {}", key, other)),
        None => Err(format!("missing field `{}`", key)),
    }
}

impl TryFrom<Map<String, Value>> for MetricRequestPayload {
    type Error = String;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let model_id = required_str(&fields, "modelId")?;
        let metric_name = required_str(&fields, "metricName")?;
        Ok(Self {
            fields,
            model_id,
            metric_name,
        })
    }
}

impl From<MetricRequestPayload> for Map<String, Value> {
    fn from(payload: MetricRequestPayload) -> Self {
        payload.fields
    }
}

/// One entry of the listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMetricRequest {
    pub id: String,
    pub request: MetricRequestPayload,
}

impl ScheduledMetricRequest {
    /// `(modelId, metricName)` pair used to match existing requests
    pub fn key(&self) -> (String, String) {
        (
            self.request.model_id.clone(),
            self.request.metric_name.clone(),
        )
    }
}

/// Body of the listing endpoint and of a backup file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub requests: Vec<ScheduledMetricRequest>,
}

impl BackupDocument {
    /// Parse and validate a listing body
    pub fn parse(body: &str) -> Result<Self, RemediationError> {
        serde_json::from_str(body).map_err(|e| RemediationError::MalformedListing(e.to_string()))
    }
}

/// Sidecar written next to every backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub timestamp: String,
    pub namespace: String,
    pub route: String,
    pub metric_type: Option<String>,
    pub count: usize,
    pub backup_file: String,
}

/// Metric kinds the service can schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Spd,
    Dir,
    MeanShift,
    KsTest,
    ApproxKsTest,
    FourierMmd,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Spd,
        MetricKind::Dir,
        MetricKind::MeanShift,
        MetricKind::KsTest,
        MetricKind::ApproxKsTest,
        MetricKind::FourierMmd,
    ];

    /// Resolve a metric name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Spd => "SPD",
            MetricKind::Dir => "DIR",
            MetricKind::MeanShift => "MEANSHIFT",
            MetricKind::KsTest => "KSTEST",
            MetricKind::ApproxKsTest => "APPROXKSTEST",
            MetricKind::FourierMmd => "FOURIERMMD",
        }
    }

    /// Scheduling endpoint for this kind
    pub fn endpoint(&self) -> &'static str {
        match self {
            MetricKind::Spd => "/metrics/group/fairness/spd/request",
            MetricKind::Dir => "/metrics/group/fairness/dir/request",
            MetricKind::MeanShift => "/metrics/drift/meanshift/request",
            MetricKind::KsTest => "/metrics/drift/kstest/request",
            MetricKind::ApproxKsTest => "/metrics/drift/approxkstest/request",
            MetricKind::FourierMmd => "/metrics/drift/fouriermmd/request",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = RemediationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            RemediationError::Configuration(format!("unknown metric kind: {}", s))
        })
    }
}
