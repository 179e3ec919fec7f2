//! `migrate-schema` command

use anyhow::{bail, Result};
use remediation_lib::schema::{parse_path, MigrationOptions, SchemaMigrator};
use remediation_lib::Mode;

use super::Context;

/// Classify orchestrator exporter sections and migrate the legacy ones
pub async fn migrate_schema(
    ctx: &Context,
    namespace: Option<String>,
    exporter_path: Option<String>,
    mode: Mode,
) -> Result<u8> {
    let path = parse_path(exporter_path.as_deref().unwrap_or(&ctx.settings.exporter_path));
    if path.is_empty() {
        bail!("Exporter path must not be empty");
    }

    let cluster = ctx.cluster().await?;
    let options = MigrationOptions {
        kind: ctx.settings.orchestrator_kind.resource_kind(),
        exporter_path: path,
        mode,
        rollout: ctx.settings.waits.rollout(),
    };

    let summary = SchemaMigrator::new(&cluster, options)
        .run(namespace.as_deref(), &ctx.cancel)
        .await?;
    ctx.report(&summary)
}
