//! `metrics backup` and `metrics restore` commands

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use remediation_lib::auth::resolve_token;
use remediation_lib::cluster::Cluster;
use remediation_lib::metrics::{
    read_backup, write_backup, BackupOptions, MetricsRestorer, RestoreOptions, TrustyAiClient,
    LATEST_FILE,
};
use remediation_lib::RemediationError;
use serde_json::json;
use tracing::info;

use super::Context;
use crate::output::{print_info, print_json, print_success, OutputFormat};
use crate::EndpointArgs;

/// Base URL from `--url`, or from the service route in the namespace
async fn resolve_base_url(ctx: &Context, namespace: &str, endpoint: &EndpointArgs) -> Result<String> {
    if let Some(url) = &endpoint.url {
        return Ok(url.as_str().trim_end_matches('/').to_string());
    }

    let cluster = ctx.cluster().await?;
    cluster.ensure_namespace(namespace).await?;
    let selector = endpoint
        .route_label
        .clone()
        .unwrap_or_else(|| ctx.settings.route_label.clone());

    let url = cluster
        .find_route(namespace, &selector)
        .await?
        .ok_or_else(|| RemediationError::RouteNotFound {
            namespace: namespace.to_string(),
            selector,
        })?;
    info!(namespace, url = %url, "Resolved service route");
    Ok(url)
}

async fn connect(ctx: &Context, namespace: &str, endpoint: &EndpointArgs) -> Result<TrustyAiClient> {
    let base_url = resolve_base_url(ctx, namespace, endpoint).await?;
    let token = resolve_token(endpoint.token.clone()).await?;
    TrustyAiClient::new(&base_url, token, endpoint.insecure)
        .with_context(|| format!("Failed to create client for {}", base_url))
}

/// Write the current scheduled metric requests to a backup file
pub async fn backup(
    ctx: &Context,
    namespace: &str,
    backup_dir: Option<PathBuf>,
    metric_type: Option<String>,
    endpoint: &EndpointArgs,
) -> Result<u8> {
    let client = connect(ctx, namespace, endpoint).await?;
    let options = BackupOptions {
        dir: backup_dir.unwrap_or_else(|| ctx.settings.backup_dir.clone()),
        namespace: namespace.to_string(),
        metric_type,
    };

    let result = write_backup(&client, &options)
        .await
        .context("Backup failed")?;

    match ctx.format {
        OutputFormat::Json => print_json(&json!({
            "file": result.file,
            "metadataFile": result.metadata_file,
            "latest": result.latest,
            "count": result.count,
        }))?,
        OutputFormat::Table => {
            print_success(&format!(
                "Backed up {} metric request(s) to {}",
                result.count,
                result.file.display()
            ));
            print_info(&format!("Metadata: {}", result.metadata_file.display()));
        }
    }
    Ok(0)
}

/// Resubmit the requests from a backup file
pub async fn restore(
    ctx: &Context,
    namespace: &str,
    file: Option<PathBuf>,
    skip_existing: bool,
    dry_run: bool,
    endpoint: &EndpointArgs,
) -> Result<u8> {
    let file = file.unwrap_or_else(|| ctx.settings.backup_dir.join(LATEST_FILE));
    let document = read_backup(&file).await?;
    if ctx.format == OutputFormat::Table {
        print_info(&format!(
            "Restoring {} request(s) from {}",
            document.requests.len(),
            file.display()
        ));
    }

    let options = RestoreOptions {
        skip_existing,
        dry_run,
    };
    let client = if options.needs_service() {
        Some(connect(ctx, namespace, endpoint).await?)
    } else {
        None
    };
    let summary = MetricsRestorer::new(client.as_ref(), options)
        .run(&document, &ctx.cancel)
        .await?;
    ctx.report(&summary)
}
