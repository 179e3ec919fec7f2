//! Exporter schema classification and mapping
//!
//! Orchestrator resources carry an OpenTelemetry exporter section that was
//! renamed between operator major versions. This module holds the pure
//! logic: [`classify`] decides which naming scheme a section uses and
//! [`migrate`] maps a legacy section onto the current field names.
//! [`SchemaMigrator`] drives it against the cluster.

mod migrator;


pub use migrator::{MigrationOptions, SchemaMigrator};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names used before the upgrade
pub const LEGACY_FIELDS: [&str; 7] = [
    "protocol",
    "tracesProtocol",
    "metricsProtocol",
    "otlpEndpoint",
    "tracesEndpoint",
    "metricsEndpoint",
    "otlpExport",
];

/// Field names used after the upgrade
pub const CURRENT_FIELDS: [&str; 5] = [
    "otlpProtocol",
    "otlpTracesEndpoint",
    "otlpMetricsEndpoint",
    "enableTraces",
    "enableMetrics",
];

/// Default location of the exporter section inside the resource
pub const DEFAULT_EXPORTER_PATH: &str = "spec.otelExporter";

/// Exporter section using the legacy names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyExporter {
    pub protocol: Option<String>,
    pub traces_protocol: Option<String>,
    pub metrics_protocol: Option<String>,
    pub otlp_endpoint: Option<String>,
    pub traces_endpoint: Option<String>,
    pub metrics_endpoint: Option<String>,
    pub otlp_export: Option<String>,
}

impl LegacyExporter {
    /// Extract the legacy fields from a section. Scalars are read as strings,
    /// empty strings count as unset.
    pub fn from_section(section: &Map<String, Value>) -> Self {
        let field = |name: &str| section.get(name).and_then(scalar_string);
        Self {
            protocol: field("protocol"),
            traces_protocol: field("tracesProtocol"),
            metrics_protocol: field("metricsProtocol"),
            otlp_endpoint: field("otlpEndpoint"),
            traces_endpoint: field("tracesEndpoint"),
            metrics_endpoint: field("metricsEndpoint"),
            otlp_export: field("otlpExport"),
        }
    }
}

/// Exporter section using the current names. Unset fields are never
/// serialized, so a migration never writes `false` flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentExporter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp_protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp_traces_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp_metrics_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_traces: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_metrics: Option<bool>,
}

impl CurrentExporter {
    pub fn is_empty(&self) -> bool {
        self == &CurrentExporter::default()
    }
}

/// Which naming scheme an exporter section uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaState {
    /// No exporter section, or an empty one
    Unconfigured,
    /// At least one legacy field is set
    Legacy(LegacyExporter),
    /// Only current fields are set
    Current,
    /// Set, but matching neither scheme
    Unknown { fields: Vec<String> },
}

impl SchemaState {
    pub fn label(&self) -> &'static str {
        match self {
            SchemaState::Unconfigured => "unconfigured",
            SchemaState::Legacy(_) => "legacy",
            SchemaState::Current => "current",
            SchemaState::Unknown { .. } => "unknown",
        }
    }
}

/// Classify an exporter section.
///
/// Absent, null or empty sections are `Unconfigured`. Any legacy field makes
/// the section `Legacy`, even next to current fields. Only current fields
/// make it `Current`. Everything else, including current fields mixed with
/// unrecognised keys, is `Unknown`.
pub fn classify(section: Option<&Value>) -> SchemaState {
    let map = match section {
        None | Some(Value::Null) => return SchemaState::Unconfigured,
        Some(Value::Object(map)) => map,
        Some(other) => {
            return SchemaState::Unknown {
                fields: vec![format!("<{}>", json_type(other))],
            }
        }
    };

    let present: Vec<&String> = map
        .iter()
        .filter(|(_, value)| is_present(value))
        .map(|(key, _)| key)
        .collect();
    if present.is_empty() {
        return SchemaState::Unconfigured;
    }

    let has_legacy = present.iter().any(|k| LEGACY_FIELDS.contains(&k.as_str()));
    if has_legacy {
        return SchemaState::Legacy(LegacyExporter::from_section(map));
    }

    let unrecognised: Vec<String> = present
        .iter()
        .filter(|k| !CURRENT_FIELDS.contains(&k.as_str()))
        .map(|k| k.to_string())
        .collect();
    if unrecognised.is_empty() {
        SchemaState::Current
    } else {
        SchemaState::Unknown {
            fields: unrecognised,
        }
    }
}

/// Outcome of mapping a legacy section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub target: CurrentExporter,
    pub warnings: Vec<String>,
}

/// Map a legacy section onto the current field names
pub fn migrate(legacy: &LegacyExporter) -> Migration {
    let mut warnings = Vec::new();

    let otlp_protocol = match (
        &legacy.protocol,
        &legacy.traces_protocol,
        &legacy.metrics_protocol,
    ) {
        (Some(protocol), _, _) => Some(protocol.clone()),
        (None, Some(traces), Some(metrics)) if traces != metrics => {
            warnings.push(format!(
                "tracesProtocol '{}' and metricsProtocol '{}' differ; using tracesProtocol",
                traces, metrics
            ));
            Some(traces.clone())
        }
        (None, Some(traces), _) => Some(traces.clone()),
        (None, None, metrics) => metrics.clone(),
    };

    let otlp_traces_endpoint = legacy
        .traces_endpoint
        .clone()
        .or_else(|| legacy.otlp_endpoint.clone());
    let otlp_metrics_endpoint = legacy
        .metrics_endpoint
        .clone()
        .or_else(|| legacy.otlp_endpoint.clone());

    let (enable_traces, enable_metrics) = match legacy.otlp_export.as_deref() {
        Some(export) => export_flags(export),
        None => (None, None),
    };

    Migration {
        target: CurrentExporter {
            otlp_protocol,
            otlp_traces_endpoint,
            otlp_metrics_endpoint,
            enable_traces,
            enable_metrics,
        },
        warnings,
    }
}

/// Flags enabled by an `otlpExport` value; disabled flags are `None`
fn export_flags(export: &str) -> (Option<bool>, Option<bool>) {
    let export = export.to_ascii_lowercase();
    let all = export.contains("all");
    let traces = all || export.contains("trace");
    let metrics = all || export.contains("metric");
    (traces.then_some(true), metrics.then_some(true))
}

/// Split a dotted path such as `spec.otelExporter`
pub fn parse_path(path: &str) -> Vec<String> {
    path.split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Look up the exporter section inside a resource body
pub fn exporter_section<'a>(data: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(data, |node, key| node.get(key))
}

/// Merge patch writing `target` at `path` and removing the legacy keys
/// that were present, so the resource ends up in the `Current` state.
pub fn build_patch(path: &[String], target: &CurrentExporter, section: &Value) -> Value {
    let mut exporter = match serde_json::to_value(target) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Some(existing) = section.as_object() {
        for field in LEGACY_FIELDS {
            if existing.contains_key(field) {
                exporter.insert(field.to_string(), Value::Null);
            }
        }
    }

    path.iter()
        .rev()
        .fold(Value::Object(exporter), |inner, key| {
            let mut map = Map::new();
            map.insert(key.clone(), inner);
            Value::Object(map)
        })
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
