//! Configuration management for the CLI
//!
//! Settings come from serde defaults, then an optional TOML file, then
//! `REMEDIATE_*` environment variables (`__` separates nested keys).
//! Command-line flags override all of them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use remediation_lib::{ResourceKind, WaitPolicy};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "REMEDIATE";

/// Group/version/kind of a custom resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSettings {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl From<ResourceKind> for KindSettings {
    fn from(kind: ResourceKind) -> Self {
        Self {
            group: kind.group,
            version: kind.version,
            kind: kind.kind,
            plural: kind.plural,
        }
    }
}

impl KindSettings {
    pub fn resource_kind(&self) -> ResourceKind {
        ResourceKind::new(&self.group, &self.version, &self.kind, &self.plural)
    }
}

/// Timeouts for the waits, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    pub rollout_timeout_secs: u64,
    pub pod_ready_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            rollout_timeout_secs: 120,
            pod_ready_timeout_secs: 300,
            poll_interval_secs: 5,
        }
    }
}

impl WaitSettings {
    pub fn rollout(&self) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_secs(self.rollout_timeout_secs),
            self.interval(),
        )
    }

    pub fn pod_ready(&self) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_secs(self.pod_ready_timeout_secs),
            self.interval(),
        )
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// CLI settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub service_kind: KindSettings,
    pub orchestrator_kind: KindSettings,
    pub exporter_path: String,
    pub container: String,
    pub pod_selector: String,
    pub identity_label: String,
    pub route_label: String,
    pub backup_dir: PathBuf,
    pub waits: WaitSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_kind: ResourceKind::trustyai_service().into(),
            orchestrator_kind: ResourceKind::guardrails_orchestrator().into(),
            exporter_path: remediation_lib::schema::DEFAULT_EXPORTER_PATH.to_string(),
            container: remediation_lib::probe::DEFAULT_CONTAINER.to_string(),
            pod_selector: remediation_lib::deadlock::DEFAULT_POD_SELECTOR.to_string(),
            identity_label: remediation_lib::deadlock::DEFAULT_IDENTITY_LABEL.to_string(),
            route_label: remediation_lib::metrics::DEFAULT_ROUTE_SELECTOR.to_string(),
            backup_dir: PathBuf::from("./metrics-backups"),
            waits: WaitSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (which must exist) or the default file
    /// location (which may not), plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(default) = Self::config_path() {
                    builder = builder.add_source(File::from(default).required(false));
                }
            }
        }

        builder
            .add_source(env)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Get the default configuration file path
    pub fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| {
            home.join(".config")
                .join("remediate")
                .join("config.toml")
        })
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
