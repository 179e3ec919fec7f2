//! `break-deadlock` command

use anyhow::Result;
use remediation_lib::deadlock::{DeadlockBreaker, DeadlockOptions};
use remediation_lib::Mode;

use super::Context;

/// Detect and optionally break Running/Pending pod contention
pub async fn break_deadlock(
    ctx: &Context,
    namespace: Option<String>,
    selector: Option<String>,
    identity_label: Option<String>,
    mode: Mode,
) -> Result<u8> {
    let cluster = ctx.cluster().await?;
    let options = DeadlockOptions {
        selector: selector.unwrap_or_else(|| ctx.settings.pod_selector.clone()),
        identity_label: identity_label.unwrap_or_else(|| ctx.settings.identity_label.clone()),
        mode,
        pod_ready: ctx.settings.waits.pod_ready(),
    };

    let summary = DeadlockBreaker::new(&cluster, options)
        .run(namespace.as_deref(), &ctx.cancel)
        .await?;
    ctx.report(&summary)
}
