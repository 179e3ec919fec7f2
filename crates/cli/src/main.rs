//! Upgrade remediation CLI
//!
//! A command-line tool for checking and repairing serving platform
//! resources around an operator upgrade: readiness probes, exporter schema,
//! scheduled metrics, GPU deadlocks and pre-upgrade checks.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use remediation_lib::{Mode, RemediationError};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use commands::{deadlock, metrics, preflight, probes, schema, Context};

/// Upgrade remediation CLI
#[derive(Parser)]
#[command(name = "remediate")]
#[command(author, version, about = "Remediation toolkit for serving platform operator upgrades", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file (defaults to $KUBECONFIG or ~/.kube/config)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Settings file (defaults to ~/.config/remediate/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// How the command treats the cluster
#[derive(Args, Debug, Clone, Copy, Default)]
#[group(multiple = false)]
pub struct ModeArgs {
    /// Report only (default)
    #[arg(long)]
    pub check: bool,

    /// Apply changes
    #[arg(long)]
    pub fix: bool,

    /// Report and show the change that would be applied
    #[arg(long)]
    pub dry_run: bool,
}

impl ModeArgs {
    pub fn mode(&self) -> Mode {
        if self.fix {
            Mode::Fix
        } else if self.dry_run {
            Mode::DryRun
        } else {
            Mode::Check
        }
    }
}

/// Where and how to reach the service REST API
#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
    /// Label selector of the service route
    #[arg(long)]
    pub route_label: Option<String>,

    /// Service base URL, bypassing route discovery
    #[arg(long)]
    pub url: Option<Url>,

    /// Bearer token (defaults to `oc whoami -t`)
    #[arg(long, env = "REMEDIATE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Accept invalid TLS certificates
    #[arg(long)]
    pub insecure: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add the readiness probe to service deployments
    PatchProbes {
        /// Namespace (all namespaces if not specified)
        #[arg(long, short)]
        namespace: Option<String>,

        /// Name of the serving container
        #[arg(long)]
        container: Option<String>,

        #[command(flatten)]
        mode: ModeArgs,
    },

    /// Migrate orchestrator exporter settings to the current schema
    MigrateSchema {
        /// Namespace (all namespaces if not specified)
        #[arg(long, short)]
        namespace: Option<String>,

        /// Dotted path of the exporter section
        #[arg(long)]
        exporter_path: Option<String>,

        #[command(flatten)]
        mode: ModeArgs,
    },

    /// Back up and restore scheduled metrics
    #[command(subcommand)]
    Metrics(MetricsCommands),

    /// Break Running/Pending GPU contention between predictor pods
    BreakDeadlock {
        /// Namespace (all namespaces if not specified)
        #[arg(long, short)]
        namespace: Option<String>,

        /// Label selector for predictor pods
        #[arg(long)]
        selector: Option<String>,

        /// Label naming the service a pod belongs to
        #[arg(long)]
        identity_label: Option<String>,

        #[command(flatten)]
        mode: ModeArgs,
    },

    /// Run read-only checks before an upgrade
    Preflight {
        /// Namespace (all namespaces if not specified)
        #[arg(long, short)]
        namespace: Option<String>,

        /// Skip the service health endpoint check
        #[arg(long)]
        skip_connectivity: bool,

        /// Label selector of the service route
        #[arg(long)]
        route_label: Option<String>,

        /// Bearer token for the health endpoint
        #[arg(long, env = "REMEDIATE_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Accept invalid TLS certificates
        #[arg(long)]
        insecure: bool,
    },
}

#[derive(Subcommand)]
pub enum MetricsCommands {
    /// Save the scheduled metric requests to a file
    Backup {
        /// Namespace of the service
        #[arg(long, short)]
        namespace: String,

        /// Directory for backup files
        #[arg(long)]
        backup_dir: Option<PathBuf>,

        /// Only back up requests of this metric type
        #[arg(long)]
        metric_type: Option<String>,

        #[command(flatten)]
        endpoint: EndpointArgs,
    },

    /// Resubmit the requests from a backup file
    Restore {
        /// Namespace of the service
        #[arg(long, short)]
        namespace: String,

        /// Backup file (defaults to latest.json in the backup directory)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Skip requests whose model and metric are already scheduled
        #[arg(long)]
        skip_existing: bool,

        /// Show what would be submitted without submitting
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        endpoint: EndpointArgs,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "info,remediation_lib=debug,remediate_cli=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let environment = e
                .downcast_ref::<RemediationError>()
                .map(RemediationError::is_environment)
                .unwrap_or(false);
            if environment {
                output::print_error(&format!("Cannot run in this environment: {:#}", e));
            } else {
                output::print_error(&format!("{:#}", e));
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let settings = config::Settings::load(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current item");
            on_interrupt.cancel();
        }
    });

    let ctx = Context {
        settings,
        format: cli.format,
        kubeconfig: cli.kubeconfig,
        cancel,
    };

    match cli.command {
        Commands::PatchProbes {
            namespace,
            container,
            mode,
        } => probes::patch_probes(&ctx, namespace, container, mode.mode()).await,
        Commands::MigrateSchema {
            namespace,
            exporter_path,
            mode,
        } => schema::migrate_schema(&ctx, namespace, exporter_path, mode.mode()).await,
        Commands::Metrics(metrics_cmd) => match metrics_cmd {
            MetricsCommands::Backup {
                namespace,
                backup_dir,
                metric_type,
                endpoint,
            } => metrics::backup(&ctx, &namespace, backup_dir, metric_type, &endpoint).await,
            MetricsCommands::Restore {
                namespace,
                file,
                skip_existing,
                dry_run,
                endpoint,
            } => {
                metrics::restore(&ctx, &namespace, file, skip_existing, dry_run, &endpoint).await
            }
        },
        Commands::BreakDeadlock {
            namespace,
            selector,
            identity_label,
            mode,
        } => deadlock::break_deadlock(&ctx, namespace, selector, identity_label, mode.mode()).await,
        Commands::Preflight {
            namespace,
            skip_connectivity,
            route_label,
            token,
            insecure,
        } => {
            preflight::preflight(
                &ctx,
                namespace,
                skip_connectivity,
                route_label,
                token,
                insecure,
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_flags() {
        let cli = Cli::try_parse_from(["remediate", "patch-probes", "--fix"]).unwrap();
        match cli.command {
            Commands::PatchProbes { mode, .. } => assert_eq!(mode.mode(), Mode::Fix),
            _ => panic!("wrong command"),
        }

        let cli = Cli::try_parse_from(["remediate", "break-deadlock", "-n", "models"]).unwrap();
        match cli.command {
            Commands::BreakDeadlock { mode, namespace, .. } => {
                assert_eq!(mode.mode(), Mode::Check);
                assert_eq!(namespace.as_deref(), Some("models"));
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_mode_flags_are_exclusive() {
        let result = Cli::try_parse_from(["remediate", "migrate-schema", "--fix", "--dry-run"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_metrics_commands_require_namespace() {
        assert!(Cli::try_parse_from(["remediate", "metrics", "backup"]).is_err());
        assert!(Cli::try_parse_from(["remediate", "metrics", "backup", "-n", "models"]).is_ok());
    }

    #[test]
    fn test_url_is_validated() {
        let result = Cli::try_parse_from([
            "remediate", "metrics", "restore", "-n", "models", "--url", "not a url",
        ]);
        assert!(result.is_err());
    }
}
