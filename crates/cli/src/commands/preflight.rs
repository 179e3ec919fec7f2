//! `preflight` command

use anyhow::Result;
use remediation_lib::auth::resolve_token;
use remediation_lib::metrics::{HealthProbe, HttpHealthProbe};
use remediation_lib::preflight::{PreflightChecker, PreflightOptions};
use remediation_lib::schema::parse_path;
use tracing::warn;

use super::Context;
use crate::output::print_preflight;

/// Run every read-only check and report per instance
pub async fn preflight(
    ctx: &Context,
    namespace: Option<String>,
    skip_connectivity: bool,
    route_label: Option<String>,
    token: Option<String>,
    insecure: bool,
) -> Result<u8> {
    let cluster = ctx.cluster().await?;

    let health = if skip_connectivity {
        None
    } else {
        let token = match resolve_token(token).await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "No bearer token for the health check");
                None
            }
        };
        Some(HttpHealthProbe::new(token, insecure)?)
    };

    let settings = &ctx.settings;
    let options = PreflightOptions {
        service_kind: settings.service_kind.resource_kind(),
        orchestrator_kind: settings.orchestrator_kind.resource_kind(),
        container: settings.container.clone(),
        exporter_path: parse_path(&settings.exporter_path),
        pod_selector: settings.pod_selector.clone(),
        identity_label: settings.identity_label.clone(),
        route_selector: route_label.unwrap_or_else(|| settings.route_label.clone()),
    };

    let checker = PreflightChecker::new(
        &cluster,
        health.as_ref().map(|h| h as &dyn HealthProbe),
        options,
    );
    let report = checker.run(namespace.as_deref()).await?;

    print_preflight(&report, ctx.format)?;
    Ok(report.exit_code() as u8)
}
