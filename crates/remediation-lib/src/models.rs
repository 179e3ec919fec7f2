//! Core data models shared by the remediation commands

use kube::core::{ApiResource, GroupVersionKind};
use serde::{Deserialize, Serialize};

/// Custom resource type addressed by group, version, kind and plural
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ResourceKind {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }

    /// TrustyAI service instances, one deployment each
    pub fn trustyai_service() -> Self {
        Self::new(
            "trustyai.opendatahub.io",
            "v1",
            "TrustyAIService",
            "trustyaiservices",
        )
    }

    /// Guardrails orchestrators, which carry the exporter configuration
    pub fn guardrails_orchestrator() -> Self {
        Self::new(
            "trustyai.opendatahub.io",
            "v1alpha1",
            "GuardrailsOrchestrator",
            "guardrailsorchestrators",
        )
    }

    /// OpenShift routes exposing service endpoints
    pub fn route() -> Self {
        Self::new("route.openshift.io", "v1", "Route", "routes")
    }

    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural)
    }

    /// Short display form, e.g. `trustyaiservices.trustyai.opendatahub.io`
    pub fn display_name(&self) -> String {
        if self.group.is_empty() {
            self.plural.clone()
        } else {
            format!("{}.{}", self.plural, self.group)
        }
    }
}

/// Namespaced object reference used as the target of an outcome
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// How a remediation command treats the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Report only
    #[default]
    Check,
    /// Apply changes
    Fix,
    /// Report and show the change that would be applied
    DryRun,
}

impl Mode {
    pub fn applies_changes(&self) -> bool {
        matches!(self, Mode::Fix)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Check => write!(f, "check"),
            Mode::Fix => write!(f, "fix"),
            Mode::DryRun => write!(f, "dry-run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_resource_from_kind() {
        let ar = ResourceKind::trustyai_service().api_resource();
        assert_eq!(ar.api_version, "trustyai.opendatahub.io/v1");
        assert_eq!(ar.plural, "trustyaiservices");
        assert_eq!(ar.kind, "TrustyAIService");
    }

    #[test]
    fn test_only_fix_applies_changes() {
        assert!(Mode::Fix.applies_changes());
        assert!(!Mode::Check.applies_changes());
        assert!(!Mode::DryRun.applies_changes());
    }

    #[test]
    fn test_object_ref_display() {
        assert_eq!(ObjectRef::new("ns", "svc").to_string(), "ns/svc");
    }
}
