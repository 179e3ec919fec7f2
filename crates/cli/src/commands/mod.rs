//! Subcommand implementations

pub mod deadlock;
pub mod metrics;
pub mod preflight;
pub mod probes;
pub mod schema;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use remediation_lib::cluster::KubeCluster;
use remediation_lib::BatchSummary;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::output::{print_summary, OutputFormat};

/// State shared by every subcommand
pub struct Context {
    pub settings: Settings,
    pub format: OutputFormat,
    pub kubeconfig: Option<PathBuf>,
    pub cancel: CancellationToken,
}

impl Context {
    /// Connect to the cluster and verify the session
    pub async fn cluster(&self) -> Result<KubeCluster> {
        KubeCluster::connect(self.kubeconfig.as_deref())
            .await
            .context("Failed to connect to the cluster")
    }

    /// Print a batch summary and turn it into an exit code
    pub fn report(&self, summary: &BatchSummary) -> Result<u8> {
        print_summary(summary, self.format)?;
        if self.cancel.is_cancelled() {
            crate::output::print_warning("Run was interrupted; remaining items were skipped");
        }
        Ok(summary.exit_code() as u8)
    }
}
