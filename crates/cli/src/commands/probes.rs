//! `patch-probes` command

use anyhow::Result;
use remediation_lib::probe::{ProbePatchOptions, ProbePatcher, ReadinessProbe};
use remediation_lib::Mode;

use super::Context;

/// Add the readiness probe to every service deployment
pub async fn patch_probes(
    ctx: &Context,
    namespace: Option<String>,
    container: Option<String>,
    mode: Mode,
) -> Result<u8> {
    let cluster = ctx.cluster().await?;
    let options = ProbePatchOptions {
        kind: ctx.settings.service_kind.resource_kind(),
        container: container.unwrap_or_else(|| ctx.settings.container.clone()),
        probe: ReadinessProbe::default(),
        mode,
        rollout: ctx.settings.waits.rollout(),
    };

    let summary = ProbePatcher::new(&cluster, options)
        .run(namespace.as_deref(), &ctx.cancel)
        .await?;
    ctx.report(&summary)
}
